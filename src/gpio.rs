//! ==============================================================================
//! gpio.rs - MFRC522 tag reader via python subprocess
//! ==============================================================================
//!
//! purpose:
//!     provides REAL access to the MFRC522 proximity reader on the SPI bus.
//!     this is the HOST-SIDE implementation of the TagSensor device.
//!
//! relationships:
//!     - implements: hal.rs (TagSensor)
//!     - used by: hal.rs (open_tag_sensor), sensor.rs (polling loop)
//!     - uses: python3/mfrc522 (SimpleMFRC522.read_id_no_block)
//!
//! why subprocess to python?:
//!     the reader's anticollision handshake is timing sensitive and the vendor
//!     library already handles retries. a single long-lived python process
//!     streams one line per poll so we pay the import cost only once.
//!
//! line protocol (stdout, one line per poll):
//!     <decimal id>   a tag is present
//!     -              no tag
//!     !<message>     read error
//!
//! ==============================================================================

use crate::domain::{now_ms, TagReading};
use crate::hal::TagSensor;
use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Lines};
use std::process::{Child, ChildStdout, Command, Stdio};

fn reader_script(interval_ms: u64) -> String {
    format!(
        r#"
import sys, time
from mfrc522 import SimpleMFRC522

reader = SimpleMFRC522()
while True:
    try:
        tag = reader.read_id_no_block()
        print(tag if tag else "-", flush=True)
    except Exception as e:
        # Print ONLY the error message (no traceback with paths)
        print("!" + str(e).replace("\n", " "), flush=True)
        time.sleep(1)
    time.sleep({} / 1000.0)
"#,
        interval_ms
    )
}

/// one line from the reader process
#[derive(Debug, PartialEq, Eq)]
pub enum ReaderLine {
    Tag(String),
    NoTag,
    Error(String),
}

pub fn parse_reader_line(line: &str) -> ReaderLine {
    let line = line.trim();
    if line.is_empty() || line == "-" || line == "None" {
        ReaderLine::NoTag
    } else if let Some(message) = line.strip_prefix('!') {
        ReaderLine::Error(message.trim().to_string())
    } else {
        ReaderLine::Tag(line.to_string())
    }
}

/// long-lived python reader process
pub struct Mfrc522Reader {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Mfrc522Reader {
    pub fn spawn(python: &str, interval_ms: u64) -> Result<Self> {
        let mut child = Command::new(python)
            .arg("-u")
            .arg("-c")
            .arg(reader_script(interval_ms))
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to run {}", python))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("reader stdout not captured"))?;
        Ok(Self { child, lines: BufReader::new(stdout).lines() })
    }
}

impl TagSensor for Mfrc522Reader {
    /// blocks until the reader process emits its next line
    fn poll_once(&mut self) -> Result<TagReading> {
        let line = self
            .lines
            .next()
            .ok_or_else(|| anyhow!("reader process exited"))?
            .context("reading from reader process")?;

        match parse_reader_line(&line) {
            ReaderLine::Tag(id) => Ok(TagReading { tag_id: Some(id), captured_at: Some(now_ms()) }),
            ReaderLine::NoTag => Ok(TagReading { tag_id: None, captured_at: Some(now_ms()) }),
            ReaderLine::Error(message) => Err(anyhow!("MFRC522 error: {}", message)),
        }
    }
}

impl Drop for Mfrc522Reader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
