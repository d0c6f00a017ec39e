use annotation_core::schema::Suggestion;
use annotation_core::EntitySuggester;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Runs an external NER program: document text goes to its stdin, a JSON
/// array of `{text, label, start, end}` is expected on its stdout.
pub struct CommandSuggester {
    program: String,
    args: Vec<String>,
}

impl CommandSuggester {
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().context("empty suggester command")?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl EntitySuggester for CommandSuggester {
    fn suggest(&self, text: &str) -> Result<Vec<Suggestion>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        let mut stdin = child.stdin.take().context("suggester stdin not captured")?;
        let input = text.to_string();
        // write from a thread so a chatty child cannot fill stdout and block us
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| anyhow::anyhow!("stdin writer panicked"))??;
        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }
        let suggestions = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("{} printed invalid suggestion JSON", self.program))?;
        Ok(suggestions)
    }
}

/// Suggestions precomputed into a JSON file; the document text is ignored.
pub struct FileSuggester {
    path: PathBuf,
}

impl FileSuggester {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl EntitySuggester for FileSuggester {
    fn suggest(&self, _text: &str) -> Result<Vec<Suggestion>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
