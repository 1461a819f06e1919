//! PJL control layer
//!
//! Resident in slot 0. Parses `@PJL` command lines between jobs and keeps two
//! tiers of variables: persistent defaults and the current job environment.
//! The environment is rebuilt from the defaults on `initialize` and whenever a
//! Universal Exit is parsed.

use std::collections::BTreeMap;

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::{PdlError, PdlResult};
use crate::dispatch::implementation::{
    Characteristics, ControlLayer, Implementation, ProcessStatus, UNIVERSAL_EXIT,
    is_partial_universal_exit, starts_with_universal_exit,
};
use crate::dispatch::sense::{AUTO_LANGUAGE, LANGUAGE_VARIABLE};

use super::spool::Session;

const NAME: &str = "PJL";
const PREFIX: &[u8] = b"@PJL";

/// Longest command line accepted before the job is failed
pub const MAX_LINE: usize = 4096;

/// Factory defaults restored by `@PJL INITIALIZE`
const FACTORY_DEFAULTS: &[(&str, &str)] = &[
    (LANGUAGE_VARIABLE, AUTO_LANGUAGE),
    ("COPIES", "1"),
    ("ORIENTATION", "PORTRAIT"),
    ("PAPER", "LETTER"),
    ("RESOLUTION", "600"),
];

/// Commands accepted without effect; there is no back channel to answer them
const IGNORED_COMMANDS: &[&str] = &[
    "COMMENT", "DINQUIRE", "ECHO", "EOJ", "INFO", "INQUIRE", "JOB", "OPMSG", "RDYMSG",
    "STMSG", "USTATUS", "USTATUSOFF",
];

/// What a parsed command asks of the dispatcher
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// The PJL interpreter
#[derive(Debug, Clone)]
pub struct Pjl {
    session: Session,
    defaults: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
    last_line: Option<String>,
}

impl Default for Pjl {
    fn default() -> Self {
        Self::new()
    }
}

impl Pjl {
    /// Create a control layer holding factory defaults
    pub fn new() -> Self {
        let defaults = factory_defaults();
        Self {
            session: Session::new(NAME),
            environment: defaults.clone(),
            defaults,
            last_line: None,
        }
    }

    /// Persistent default for `name`
    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.defaults
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    fn reset_environment(&mut self) {
        self.environment = self.defaults.clone();
    }

    /// Run one command line (without its terminator)
    fn execute(&mut self, line: &[u8], offset: u64) -> PdlResult<Flow> {
        let text = String::from_utf8_lossy(line);
        self.last_line = Some(text.to_string());

        let Some(rest) = text.strip_prefix("@PJL") else {
            return Err(syntax(offset, "command does not start with @PJL"));
        };
        if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
            return Err(syntax(offset, "missing separator after @PJL"));
        }

        let comment = rest
            .trim_start()
            .get(..7)
            .is_some_and(|word| word.eq_ignore_ascii_case("COMMENT"));
        if comment {
            return Ok(Flow::Continue);
        }

        let tokens = tokenize(rest).map_err(|detail| syntax(offset, detail))?;
        let Some((command, args)) = tokens.split_first() else {
            return Ok(Flow::Continue);
        };

        match command.to_ascii_uppercase().as_str() {
            "ENTER" => {
                let (name, value) = assignment(args).map_err(|d| syntax(offset, d))?;
                if !name.eq_ignore_ascii_case(LANGUAGE_VARIABLE) {
                    return Err(syntax(offset, "ENTER only accepts LANGUAGE"));
                }
                tracing::debug!(language = %value, "PJL requested language");
                self.environment
                    .insert(LANGUAGE_VARIABLE.to_string(), value.to_ascii_uppercase());
                Ok(Flow::Exit)
            }
            "SET" => {
                let (name, value) = assignment(args).map_err(|d| syntax(offset, d))?;
                self.environment.insert(name.to_ascii_uppercase(), value);
                Ok(Flow::Continue)
            }
            "DEFAULT" => {
                let (name, value) = assignment(args).map_err(|d| syntax(offset, d))?;
                self.defaults.insert(name.to_ascii_uppercase(), value);
                Ok(Flow::Continue)
            }
            "RESET" => {
                self.reset_environment();
                Ok(Flow::Continue)
            }
            "INITIALIZE" => {
                self.defaults = factory_defaults();
                self.reset_environment();
                Ok(Flow::Continue)
            }
            other if IGNORED_COMMANDS.contains(&other) => Ok(Flow::Continue),
            other => Err(syntax(offset, format!("unknown command {}", other))),
        }
    }
}

impl ControlLayer for Pjl {
    fn get_variable(&self, name: &str) -> Option<String> {
        self.environment.get(&name.to_ascii_uppercase()).cloned()
    }
}

impl Implementation for Pjl {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            direct_file: false,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        if starts_with_universal_exit(prefix) || prefix.starts_with(PREFIX) {
            100
        } else {
            0
        }
    }

    fn initialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.initialize()?;
        self.reset_environment();
        Ok(())
    }

    fn deinitialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.deinitialize()
    }

    fn begin_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.last_line = None;
        self.session.begin_job()
    }

    fn process(&mut self, input: &mut Window<'_>, _device: &mut dyn OutputDevice) -> ProcessStatus {
        loop {
            let data = input.remaining();

            if starts_with_universal_exit(data) {
                input.consume(UNIVERSAL_EXIT.len());
                self.reset_environment();
                continue;
            }
            if data.is_empty() || is_partial_universal_exit(data) {
                return ProcessStatus::NeedInput;
            }
            if matches!(data[0], b'\r' | b'\n') {
                input.consume(1);
                continue;
            }
            if !data.starts_with(PREFIX) {
                if data.len() < PREFIX.len() && PREFIX.starts_with(data) {
                    return ProcessStatus::NeedInput;
                }
                return ProcessStatus::BenignExit;
            }

            let offset = input.position();
            let Some(newline) = data.iter().position(|&b| b == b'\n') else {
                if data.len() > MAX_LINE {
                    return ProcessStatus::Error(syntax(offset, "command line too long"));
                }
                return ProcessStatus::NeedInput;
            };

            let line = strip_cr(&data[..newline]);
            input.consume(newline + 1);
            match self.execute(line, offset) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return ProcessStatus::BenignExit,
                Err(error) => return ProcessStatus::Error(error),
            }
        }
    }

    fn process_eof(
        &mut self,
        input: &mut Window<'_>,
        _device: &mut dyn OutputDevice,
    ) -> PdlResult<()> {
        // A final command may lack its line terminator.
        let data = input.remaining();
        if data.starts_with(PREFIX) {
            let offset = input.position();
            input.consume_all();
            self.execute(strip_cr(data), offset)?;
        }
        Ok(())
    }

    fn end_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.end_job()
    }

    fn report_errors(&self, error: &PdlError, offset: u64, verbose: bool) -> String {
        match (&self.last_line, verbose) {
            (Some(line), true) => {
                format!("{} error at offset {}: {} (in {:?})", NAME, offset, error, line)
            }
            _ => format!("{} error at offset {}: {}", NAME, offset, error),
        }
    }

    fn as_control_layer(&self) -> Option<&dyn ControlLayer> {
        Some(self)
    }
}

fn factory_defaults() -> BTreeMap<String, String> {
    FACTORY_DEFAULTS
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn syntax(offset: u64, detail: impl Into<String>) -> PdlError {
    PdlError::Syntax {
        offset,
        detail: detail.into(),
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Split a command tail into words, quoted strings, `=` and `:`
fn tokenize(text: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '=' | ':' => {
                chars.next();
                tokens.push(c.to_string());
            }
            '"' => {
                chars.next();
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => quoted.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(quoted);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if matches!(c, ' ' | '\t' | '=' | ':' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }

    Ok(tokens)
}

/// Parse `[LPARM : lang] NAME = VALUE`
fn assignment(args: &[String]) -> Result<(String, String), String> {
    let args = match args {
        [lparm, colon, _language, rest @ ..]
            if lparm.eq_ignore_ascii_case("LPARM") && colon == ":" =>
        {
            rest
        }
        _ => args,
    };

    match args {
        [name, eq, value] if eq == "=" => Ok((name.clone(), value.clone())),
        [name, eq] if eq == "=" => Err(format!("missing value for {}", name)),
        _ => Err("expected NAME = VALUE".to_string()),
    }
}
