use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use crate::error::TransformError;

/// An external filter program: the bundle goes in on stdin, the transformed
/// bundle comes out on stdout. Used for vendor prefixing and minification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    /// Builds a command from `argv`. Returns `None` for an empty list, which
    /// disables the step.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransformError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin from a separate thread so a filter that streams its
        // output cannot fill the stdout pipe and stall.
        let stdin = child.stdin.take();
        let feeder = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|source| TransformError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let fed = feeder.join().unwrap_or_else(|_| {
            Err(std::io::Error::other("stdin writer panicked"))
        });

        if !output.status.success() {
            return Err(TransformError::Command {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        fed.map_err(|source| TransformError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        Ok(output.stdout)
    }
}
