//! CLI host — stdin/stdout REPL that drives the wizard for local testing.

use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::wizard::{
    BootstrapContext, BootstrapOutcome, EmailLookup, StepCatalog, StepData, StepOutcome,
    WizardManager,
};

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(Option<String>),
    Email(String),
    Submit { step: String, data: StepData },
    Draft { step: String, data: StepData },
    Back,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start [token]         bootstrap (optionally with a resume token)
  email <address>       continue where you left off
  submit <step> <json>  complete a step, e.g. submit venture {\"name\":\"Acme\"}
  draft <step> <json>   save a step without completing it
  back                  previous step
  status                show the current session
  quit                  exit";

/// Parse a REPL line.
pub fn parse_command(line: &str) -> anyhow::Result<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word {
        "start" => Command::Start((!rest.is_empty()).then(|| rest.to_string())),
        "email" => {
            if rest.is_empty() {
                bail!("usage: email <address>");
            }
            Command::Email(rest.to_string())
        }
        "submit" | "draft" => {
            let (step, json) = match rest.split_once(char::is_whitespace) {
                Some((s, j)) => (s.to_string(), j.trim()),
                None => (rest.to_string(), ""),
            };
            if step.is_empty() {
                bail!("usage: {word} <step> <json>");
            }
            let data = parse_step_data(json)?;
            if word == "submit" {
                Command::Submit { step, data }
            } else {
                Command::Draft { step, data }
            }
        }
        "back" => Command::Back,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "/quit" => Command::Quit,
        other => bail!("unknown command '{other}', type 'help'"),
    };
    Ok(cmd)
}

fn parse_step_data(json: &str) -> anyhow::Result<StepData> {
    if json.is_empty() {
        return Ok(StepData::new());
    }
    let value: serde_json::Value = serde_json::from_str(json).context("step data is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("step data must be a JSON object"),
    }
}

/// Drives a [`WizardManager`] from text commands.
pub struct WizardRepl {
    manager: Arc<WizardManager>,
}

impl WizardRepl {
    pub fn new(manager: Arc<WizardManager>) -> Self {
        Self { manager }
    }

    /// Read commands from stdin until EOF or `quit`.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("> ");

        while let Some(line) = lines.next_line().await.context("reading stdin")? {
            if line.trim().is_empty() {
                eprint!("> ");
                continue;
            }
            match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(cmd) => match self.execute(cmd).await {
                    Ok(out) => println!("\n{out}\n"),
                    Err(e) => eprintln!("❌ {e:#}"),
                },
                Err(e) => eprintln!("❌ {e:#}"),
            }
            eprint!("> ");
        }
        Ok(())
    }

    /// Run one command and render its result.
    pub async fn execute(&self, cmd: Command) -> anyhow::Result<String> {
        let out = match cmd {
            Command::Start(token) => {
                let ctx = BootstrapContext {
                    resume_token: token,
                };
                render_bootstrap(&self.manager.bootstrap(&ctx).await?)
            }
            Command::Email(address) => match self.manager.resume_by_email(&address).await? {
                EmailLookup::Resumable(outcome) => render_bootstrap(&outcome),
                EmailLookup::Claim(claim) => format!(
                    "Paid reservation found for {}. Run: start {}",
                    claim.email, claim.token
                ),
            },
            Command::Submit { step, data } => render_step(&self.manager.submit_step(&step, data).await?),
            Command::Draft { step, data } => render_step(&self.manager.save_draft(&step, data).await?),
            Command::Back => render_step(&self.manager.go_back().await?),
            Command::Status => match self.manager.current().await {
                Some(active) => {
                    let outcome = StepOutcome::from(active);
                    let body = serde_json::to_string_pretty(&outcome.session)?;
                    format!("{}\n{body}", render_step(&outcome))
                }
                None => "No active session. Type 'start'.".to_string(),
            },
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
        };
        Ok(out)
    }
}

fn step_label(index: usize) -> String {
    match StepCatalog::step_at(index) {
        Some(d) => format!("step {}/{}: {}", index + 1, StepCatalog::steps().len(), d.display_name),
        None => format!("step {}", index + 1),
    }
}

fn render_bootstrap(outcome: &BootstrapOutcome) -> String {
    let mut out = format!(
        "Session {} ({}), {}",
        outcome.session.session_id,
        outcome.mode,
        step_label(outcome.step_index)
    );
    for notice in &outcome.notices {
        if notice.is_expiry() {
            out.push_str("\n⚠️  Your resume link has expired; starting over.");
        } else {
            out.push_str(&format!("\nℹ️  {notice}"));
        }
    }
    if let Some(claim) = &outcome.claim {
        out.push_str(&format!("\n💳 Claiming reservation for {}", claim.email));
    }
    out
}

fn render_step(outcome: &StepOutcome) -> String {
    if WizardManager::is_terminal(&outcome.session) {
        return format!("✅ Intake complete for session {}", outcome.session.session_id);
    }
    let done = outcome.session.completed_steps.len();
    format!(
        "{} ({done} completed)",
        step_label(outcome.step_index)
    )
}
