use anyhow::Result;
use bat::WrappingMode;
use cliclack::{input, spinner};
use std::io;

pub enum Input {
    Text(String),
    /// Ctrl-C or a closed terminal at the prompt
    Interrupted,
}

pub trait Prompt {
    fn get_input(&mut self, label: &str) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    /// Render the final answer of a run
    fn render(&mut self, content: &str);
    fn ready(&self, title: &str) {
        println!("\n{}", "=".repeat(45));
        println!(" {} ", title);
        println!("{}", "=".repeat(45));
    }
}

pub struct CliclackPrompt {
    spinner: Option<cliclack::ProgressBar>,
    theme: &'static str,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: None,
            theme: "zenburn",
        }
    }
}

impl Default for CliclackPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn print_markdown(content: &str, theme: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(theme)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print();
    if let Err(e) = printed {
        tracing::warn!("Failed to render output: {}", e);
        println!("{}", content);
    }
}

impl Prompt for CliclackPrompt {
    fn get_input(&mut self, label: &str) -> Result<Input> {
        match input(label).placeholder("").required(false).interact::<String>() {
            Ok(text) => Ok(Input::Text(text.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Input::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    fn show_busy(&mut self) {
        let spin = spinner();
        spin.start("awaiting reply");
        self.spinner = Some(spin);
    }

    fn hide_busy(&mut self) {
        if let Some(spin) = self.spinner.take() {
            spin.stop("");
        }
    }

    fn render(&mut self, content: &str) {
        print_markdown(content, self.theme);
        println!();
    }
}
