//! Line-based console I/O

use std::io::{BufRead, Write};

use crate::error::{RagError, Result};

/// Where user input comes from and where replies go
pub trait Console: Send {
    /// Show `prompt` and read one line without its line terminator.
    ///
    /// Returns `None` once input is closed.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Print one line of output
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Console over any reader and writer pair
pub struct StdConsole<R, W> {
    reader: R,
    writer: W,
}

impl StdConsole<std::io::BufReader<std::io::Stdin>, std::io::Stdout> {
    /// Console over the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> StdConsole<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<R: BufRead + Send, W: Write + Send> Console for StdConsole<R, W> {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        writeln!(self.writer, "{}", prompt)?;
        self.writer.flush()?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| RagError::Input(format!("Failed to read input: {}", e)))?;
        if read == 0 {
            return Ok(None);
        }

        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_lines_then_eof() {
        let mut console = StdConsole::new(Cursor::new("first\r\nsecond\n"), Vec::new());

        assert_eq!(console.read_line("> ").unwrap().as_deref(), Some("first"));
        assert_eq!(console.read_line("> ").unwrap().as_deref(), Some("second"));
        assert_eq!(console.read_line("> ").unwrap(), None);
    }

    #[test]
    fn test_keeps_inner_whitespace() {
        let mut console = StdConsole::new(Cursor::new("  spaced out  \n"), Vec::new());
        assert_eq!(
            console.read_line("").unwrap().as_deref(),
            Some("  spaced out  ")
        );
    }

    #[test]
    fn test_prompt_and_output_written() {
        let mut console = StdConsole::new(Cursor::new("x\n"), Vec::new());
        console.read_line("Enter a question:").unwrap();
        console.write_line("Response: ok").unwrap();

        let output = String::from_utf8(console.into_writer()).unwrap();
        assert_eq!(output, "Enter a question:\nResponse: ok\n");
    }
}
