//! Closed script runtime.
//!
//! Generated scripts are sequences of `page.<primitive>(args);` and
//! `log(args);` statements. The primitive set is fixed: anything else is a
//! [`ScriptError`] for the step, never forwarded to the driver. A script is
//! parsed completely before its first statement runs.

use rove_browser::BrowserDriver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ScriptError;

/// Lines kept for a failing step's report
pub const LOG_TAIL_LINES: usize = 20;

/// Line-oriented logger handed to scripts
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ScriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "rove::script", "{}", line);
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// The last `n` lines
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines();
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Goto,
    Click,
    Type,
    GetText,
    Scroll,
    WaitFor,
    Press,
    Select,
    Sleep,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "goto" => Primitive::Goto,
            "click" => Primitive::Click,
            "type" => Primitive::Type,
            "getText" => Primitive::GetText,
            "scroll" => Primitive::Scroll,
            "waitFor" => Primitive::WaitFor,
            "press" => Primitive::Press,
            "select" => Primitive::Select,
            "sleep" => Primitive::Sleep,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Goto => "goto",
            Primitive::Click => "click",
            Primitive::Type => "type",
            Primitive::GetText => "getText",
            Primitive::Scroll => "scroll",
            Primitive::WaitFor => "waitFor",
            Primitive::Press => "press",
            Primitive::Select => "select",
            Primitive::Sleep => "sleep",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Num(f64),
}

impl Arg {
    fn display(&self) -> String {
        match self {
            Arg::Str(s) => s.clone(),
            Arg::Num(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Page {
        line: usize,
        primitive: Primitive,
        args: Vec<Arg>,
    },
    Log {
        line: usize,
        args: Vec<Arg>,
    },
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(script: &'a str) -> Self {
        Self {
            chars: script.chars().peekable(),
            line: 1,
        }
    }

    fn syntax(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some('/') => {
                            while let Some(c) = self.chars.peek() {
                                if *c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('*') => {
                            self.bump();
                            self.bump();
                            let mut prev = '\0';
                            loop {
                                match self.bump() {
                                    Some('/') if prev == '*' => break,
                                    Some(c) => prev = c,
                                    None => return Err(self.syntax("unterminated comment")),
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                Some('#') => {
                    while let Some(c) = self.chars.peek() {
                        if *c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.chars.peek() {
            if c.is_alphanumeric() || *c == '_' || *c == '$' {
                ident.push(*c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn expect(&mut self, expected: char) -> Result<(), ScriptError> {
        self.skip_trivia()?;
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.syntax(format!("expected `{}`, found `{}`", expected, c))),
            None => Err(self.syntax(format!("expected `{}`, found end of script", expected))),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ScriptError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(self.syntax("unterminated string"))
    }

    fn number(&mut self) -> Result<f64, ScriptError> {
        let mut text = String::new();
        while let Some(c) = self.chars.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '-' | '_') {
                if *c != '_' {
                    text.push(*c);
                }
                self.bump();
            } else {
                break;
            }
        }
        text.parse()
            .map_err(|_| self.syntax(format!("invalid number `{}`", text)))
    }

    fn args(&mut self) -> Result<Vec<Arg>, ScriptError> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.chars.peek().copied() {
                Some(')') => {
                    self.bump();
                    return Ok(args);
                }
                Some(q @ ('"' | '\'' | '`')) => {
                    self.bump();
                    args.push(Arg::Str(self.string(q)?));
                }
                Some(c) if c.is_ascii_digit() || c == '-' => args.push(Arg::Num(self.number()?)),
                Some(c) => return Err(self.syntax(format!("unsupported argument starting with `{}`", c))),
                None => return Err(self.syntax("unterminated argument list")),
            }
            self.skip_trivia()?;
            match self.chars.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                _ => return Err(self.syntax("expected `,` or `)` in argument list")),
            }
        }
    }

    fn statement(&mut self) -> Result<Option<Statement>, ScriptError> {
        self.skip_trivia()?;
        if self.chars.peek().is_none() {
            return Ok(None);
        }
        if self.chars.peek() == Some(&';') {
            self.bump();
            return self.statement();
        }

        let line = self.line;
        let mut head = self.identifier();
        if head == "await" {
            self.skip_trivia()?;
            head = self.identifier();
        }
        if head.is_empty() {
            let found = self.chars.peek().copied().unwrap_or(' ');
            return Err(self.syntax(format!("unexpected `{}`", found)));
        }

        let statement = if head == "log" {
            Statement::Log {
                line,
                args: self.args()?,
            }
        } else if head == "page" {
            self.expect('.')?;
            let name = self.identifier();
            let Some(primitive) = Primitive::from_name(&name) else {
                return Err(ScriptError::UnknownCall {
                    line,
                    call: format!("page.{}", name),
                });
            };
            Statement::Page {
                line,
                primitive,
                args: self.args()?,
            }
        } else {
            let mut call = head;
            while self.chars.peek() == Some(&'.') {
                self.bump();
                call.push('.');
                call.push_str(&self.identifier());
            }
            return Err(ScriptError::UnknownCall { line, call });
        };

        self.skip_trivia()?;
        if self.chars.peek() == Some(&';') {
            self.bump();
        }
        Ok(Some(statement))
    }
}

/// Parse a whole script into statements
pub fn parse_script(script: &str) -> Result<Vec<Statement>, ScriptError> {
    let mut parser = Parser::new(script);
    let mut statements = Vec::new();
    while let Some(statement) = parser.statement()? {
        statements.push(statement);
    }
    Ok(statements)
}

fn str_arg(args: &[Arg], i: usize, primitive: Primitive, line: usize) -> Result<String, ScriptError> {
    match args.get(i) {
        Some(Arg::Str(s)) => Ok(s.clone()),
        _ => Err(ScriptError::Syntax {
            line,
            message: format!("page.{}: argument {} must be a string", primitive.name(), i + 1),
        }),
    }
}

fn num_arg(args: &[Arg], i: usize, primitive: Primitive, line: usize) -> Result<f64, ScriptError> {
    match args.get(i) {
        Some(Arg::Num(n)) => Ok(*n),
        _ => Err(ScriptError::Syntax {
            line,
            message: format!("page.{}: argument {} must be a number", primitive.name(), i + 1),
        }),
    }
}

fn check_arity(primitive: Primitive, args: &[Arg], line: usize) -> Result<(), ScriptError> {
    let (min, max) = match primitive {
        Primitive::Goto | Primitive::Click | Primitive::GetText => (1, 1),
        Primitive::WaitFor => (1, 2),
        Primitive::Type | Primitive::Press | Primitive::Select => (2, 2),
        Primitive::Scroll => (2, 2),
        Primitive::Sleep => (1, 1),
    };
    if args.len() < min || args.len() > max {
        return Err(ScriptError::Syntax {
            line,
            message: format!(
                "page.{} takes {} argument(s), got {}",
                primitive.name(),
                if min == max { min.to_string() } else { format!("{}-{}", min, max) },
                args.len()
            ),
        });
    }
    Ok(())
}

/// Executes parsed scripts against a driver
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    navigation_timeout: Duration,
    wait_timeout: Duration,
}

impl ScriptRuntime {
    pub fn new(navigation_timeout: Duration, wait_timeout: Duration) -> Self {
        Self {
            navigation_timeout,
            wait_timeout,
        }
    }

    /// Same runtime with a different default `page.waitFor` budget
    pub fn with_wait_timeout(&self, wait_timeout: Duration) -> Self {
        Self {
            wait_timeout,
            ..self.clone()
        }
    }

    /// Parse and run `script`; stops at the first failing statement.
    pub async fn run(
        &self,
        driver: &mut dyn BrowserDriver,
        script: &str,
        log: &ScriptLog,
        cancel: &CancellationToken,
    ) -> Result<(), ScriptError> {
        let statements = parse_script(script)?;
        for statement in statements {
            if cancel.is_cancelled() {
                return Err(ScriptError::Cancelled);
            }
            match statement {
                Statement::Log { args, .. } => {
                    log.log(args.iter().map(Arg::display).collect::<Vec<_>>().join(" "));
                }
                Statement::Page {
                    line,
                    primitive,
                    args,
                } => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ScriptError::Cancelled),
                        result = self.call(driver, primitive, &args, line, log) => result?,
                    }
                }
            }
        }
        Ok(())
    }

    async fn call(
        &self,
        driver: &mut dyn BrowserDriver,
        primitive: Primitive,
        args: &[Arg],
        line: usize,
        log: &ScriptLog,
    ) -> Result<(), ScriptError> {
        check_arity(primitive, args, line)?;
        let wrap = |source: anyhow::Error| ScriptError::Primitive {
            line,
            call: format!("page.{}", primitive.name()),
            source,
        };

        match primitive {
            Primitive::Goto => {
                let url = str_arg(args, 0, primitive, line)?;
                driver
                    .navigate(&url, self.navigation_timeout)
                    .await
                    .map_err(wrap)?;
                driver
                    .wait_for_load(self.navigation_timeout)
                    .await
                    .map_err(wrap)?;
            }
            Primitive::Click => {
                let selector = str_arg(args, 0, primitive, line)?;
                driver.click(&selector).await.map_err(wrap)?;
            }
            Primitive::Type => {
                let selector = str_arg(args, 0, primitive, line)?;
                let text = str_arg(args, 1, primitive, line)?;
                driver.type_text(&selector, &text).await.map_err(wrap)?;
            }
            Primitive::GetText => {
                let selector = str_arg(args, 0, primitive, line)?;
                let text = driver.text(&selector).await.map_err(wrap)?;
                log.log(format!("text {}: {}", selector, text));
            }
            Primitive::Scroll => {
                let dx = num_arg(args, 0, primitive, line)?;
                let dy = num_arg(args, 1, primitive, line)?;
                driver.scroll_by(dx, dy).await.map_err(wrap)?;
            }
            Primitive::WaitFor => {
                let selector = str_arg(args, 0, primitive, line)?;
                let timeout = match args.get(1) {
                    Some(_) => {
                        Duration::from_millis(num_arg(args, 1, primitive, line)?.max(0.0) as u64)
                    }
                    None => self.wait_timeout,
                };
                driver
                    .wait_for_selector(&selector, timeout)
                    .await
                    .map_err(wrap)?;
            }
            Primitive::Press => {
                let selector = str_arg(args, 0, primitive, line)?;
                let key = str_arg(args, 1, primitive, line)?;
                driver.press_key(&selector, &key).await.map_err(wrap)?;
            }
            Primitive::Select => {
                let selector = str_arg(args, 0, primitive, line)?;
                let value = str_arg(args, 1, primitive, line)?;
                driver.select_option(&selector, &value).await.map_err(wrap)?;
            }
            Primitive::Sleep => {
                let ms = num_arg(args, 0, primitive, line)?.max(0.0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Ok(())
    }
}
