//! CLI topicbus
//!
//! Интерактивная оболочка над брокером в памяти процесса: подписки,
//! публикации, песочницы. Поддерживает интерактивный режим (REPL),
//! выполнение скрипта и прямые команды.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use rustyline::{error::ReadlineError, DefaultEditor};
use serde_json::Value;
use topicbus::{
    init_logging, Broker, BrokerEvent, CompilerKind, EventKind, MessageBus, Meta, Payload,
    Sandbox, Settings, Subscription,
};
use topicbus_error::{bail, ensure, BusResult, GenericError, LogLevel, StackError, StatusCode};
use tracing::{debug, error, info, warn};

const HISTORY_FILE: &str = "~/.topicbus_history";

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "topicbus-cli")]
#[command(author = "topicbus contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "topicbus CLI - explore an in-process pub/sub broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Файл конфигурации (toml, yaml, json)
    #[arg(short, long, env = "TOPICBUS_CONFIG", help = "Файл конфигурации")]
    config: Option<PathBuf>,
    /// Стратегия компиляции дескрипторов фильтров
    #[arg(
        long,
        value_enum,
        help = "Стратегия компиляции фильтров (перекрывает конфигурацию)"
    )]
    filter_compiler: Option<CompilerArg>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить логи
    #[arg(short = 'q', long, help = "Подавить логирование")]
    quiet: bool,
    /// Подкоманда для выполнения
    #[command(subcommand)]
    command: Option<Commands>,
    /// Прямые команды, разделённые `;`
    #[arg(help = "Прямые команды (например, 'SUB a.* ; PUB a.b 1')")]
    args: Vec<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CompilerArg {
    PredicateOnly,
    Query,
}

impl From<CompilerArg> for CompilerKind {
    fn from(arg: CompilerArg) -> Self {
        match arg {
            CompilerArg::PredicateOnly => CompilerKind::PredicateOnly,
            CompilerArg::Query => CompilerKind::Query,
        }
    }
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Интерактивный режим (REPL)
    #[command(alias = "i")]
    Interactive {
        /// Путь к файлу истории команд
        #[arg(
            long,
            default_value = HISTORY_FILE,
            help = "Файл для сохранения истории команд"
        )]
        history: String,
    },
    /// Выполнить скрипт: одна команда на строку
    #[command(alias = "e")]
    Exec {
        #[arg(required = true, help = "Путь к файлу скрипта")]
        script: PathBuf,
    },
}

/// Результат одной команды.
#[derive(Debug, PartialEq)]
enum Outcome {
    Continue(Vec<String>),
    Quit,
}

/// Состояние оболочки: брокер, стек песочниц и созданные подписки.
struct Session {
    broker: Broker,
    sandboxes: Vec<Sandbox>,
    subscriptions: BTreeMap<u64, Subscription>,
    outbox: Rc<RefCell<Vec<String>>>,
}

impl Session {
    fn new(broker: Broker) -> BusResult<Self> {
        let outbox = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::NewTopic, EventKind::EmptyTopic] {
            let out = Rc::clone(&outbox);
            broker.on_fn(kind, move |event: &BrokerEvent<'_>| {
                out.borrow_mut()
                    .push(format!("~ {} {}", event.kind(), event.topic()));
            })?;
        }
        Ok(Self {
            broker,
            sandboxes: Vec::new(),
            subscriptions: BTreeMap::new(),
            outbox,
        })
    }

    fn bus(&self) -> &dyn MessageBus {
        match self.sandboxes.last() {
            Some(sandbox) => sandbox,
            None => &self.broker,
        }
    }

    fn execute(
        &mut self,
        line: &str,
    ) -> BusResult<Outcome> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Outcome::Continue(Vec::new()));
        }
        let (cmd, rest) = next_word(line);
        let cmd = cmd.to_uppercase();
        debug!("Executing {cmd} {rest:?}");

        let result = match cmd.as_str() {
            "SUB" => self.subscribe(rest),
            "UNSUB" => self.unsubscribe(rest),
            "PUB" => self.publish(rest),
            "CANCEL" => self.cancel(rest),
            "COUNT" => self.count(),
            "LIST" => Ok(self.list()),
            "SANDBOX" => self.enter_sandbox(),
            "LEAVE" => self.leave_sandbox(),
            "HELP" => Ok(help()),
            "QUIT" | "EXIT" => return Ok(Outcome::Quit),
            _ => bail!(StatusCode::InvalidCommand, "unknown command: {}", cmd),
        };
        // Уведомления, накопленные командой, которая завершилась ошибкой,
        // отбрасываются вместе с ней.
        let mut out = std::mem::take(&mut *self.outbox.borrow_mut());
        let mut lines = result.map_err(|e| e.context(cmd.as_str()))?;
        out.append(&mut lines);
        Ok(Outcome::Continue(out))
    }

    fn subscribe(
        &mut self,
        args: &str,
    ) -> BusResult<Vec<String>> {
        let (topic, rest) = next_word(args);
        ensure!(!topic.is_empty(), StatusCode::InvalidArgs, "usage: SUB <topic> [limit] [filter-json]");

        let (maybe_limit, after_limit) = next_word(rest);
        let (limit, filter) = match maybe_limit.parse::<u64>() {
            Ok(n) => (Some(n), after_limit),
            Err(_) => (None, rest),
        };
        let filter = match filter.trim() {
            "" => None,
            raw => Some(parse_json(raw)?),
        };

        let out = Rc::clone(&self.outbox);
        let sub = self.bus().subscribe_with(
            topic,
            Some(Rc::new(move |message: &Payload, topic: &str, meta: &Meta, sub: &Subscription| {
                out.borrow_mut().push(format_delivery(sub, topic, message, meta));
            })),
        )?;

        let configured = limit
            .map(|n| sub.set_limit(n))
            .transpose()
            .and_then(|_| filter.map(|f| sub.set_filter(f)).transpose());
        if let Err(e) = configured {
            sub.cancel();
            return Err(e.into());
        }

        self.subscriptions.insert(sub.id().get(), sub.clone());
        Ok(vec![format!("subscribed #{} to {}", sub.id(), sub.topic())])
    }

    fn unsubscribe(
        &mut self,
        args: &str,
    ) -> BusResult<Vec<String>> {
        let (topic, _) = next_word(args);
        ensure!(!topic.is_empty(), StatusCode::InvalidArgs, "usage: UNSUB <topic>");
        self.bus().unsubscribe(topic)?;
        self.prune();
        Ok(vec!["OK".to_string()])
    }

    fn publish(
        &mut self,
        args: &str,
    ) -> BusResult<Vec<String>> {
        let (topic, rest) = next_word(args);
        ensure!(!topic.is_empty(), StatusCode::InvalidArgs, "usage: PUB <topic> [json] [meta-json]");

        let (message, meta) = parse_payload(rest)?;
        self.bus().publish_with_meta(topic, message, meta)?;
        self.prune();
        Ok(Vec::new())
    }

    fn cancel(
        &mut self,
        args: &str,
    ) -> BusResult<Vec<String>> {
        let (raw, _) = next_word(args);
        let id: u64 = raw
            .parse()
            .map_err(|_| GenericError::new(StatusCode::InvalidArgs, format!("not an id: {raw:?}")))?;
        match self.subscriptions.remove(&id) {
            Some(sub) if !sub.is_cancelled() => {
                sub.cancel();
                Ok(vec![format!("cancelled #{id}")])
            }
            _ => bail!(StatusCode::SubscriptionNotFound, "no live subscription #{}", id),
        }
    }

    fn count(&self) -> BusResult<Vec<String>> {
        let counts = self.bus().count()?;
        if counts.is_empty() {
            return Ok(vec!["(empty)".to_string()]);
        }
        Ok(counts
            .into_iter()
            .map(|(topic, n)| format!("{topic}: {n}"))
            .collect())
    }

    fn list(&mut self) -> Vec<String> {
        self.prune();
        if self.subscriptions.is_empty() {
            return vec!["(none)".to_string()];
        }
        self.subscriptions
            .values()
            .map(|sub| {
                let snapshot = serde_json::to_string(&sub.serialize())
                    .unwrap_or_else(|_| format!("#{}", sub.id()));
                format!("{snapshot} delivered={}", sub.message_count())
            })
            .collect()
    }

    fn enter_sandbox(&mut self) -> BusResult<Vec<String>> {
        let sandbox = self.bus().sandbox()?;
        self.sandboxes.push(sandbox);
        Ok(vec![format!("entered sandbox level {}", self.sandboxes.len())])
    }

    fn leave_sandbox(&mut self) -> BusResult<Vec<String>> {
        let Some(sandbox) = self.sandboxes.pop() else {
            bail!(StatusCode::InvalidCommand, "not inside a sandbox");
        };
        let dropped = sandbox.subscriptions().len();
        sandbox.destroy();
        self.prune();
        Ok(vec![format!(
            "left sandbox, cancelled {dropped} subscription(s)"
        )])
    }

    fn prune(&mut self) {
        self.subscriptions.retain(|_, sub| !sub.is_cancelled());
    }
}

/// Первое слово и остаток строки.
fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn parse_json(raw: &str) -> BusResult<Value> {
    serde_json::from_str(raw)
        .map_err(|e| GenericError::new(StatusCode::InvalidJson, format!("{e}: {raw}")).into())
}

/// Тело и метаданные для PUB: до двух JSON-значений подряд. Если остаток
/// не разбирается как JSON, он целиком становится строкой.
fn parse_payload(rest: &str) -> BusResult<(Payload, Meta)> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok((Value::Null, Meta::new()));
    }

    let values: Result<Vec<Value>, _> = serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .collect();
    let mut values = match values {
        Ok(values) => values.into_iter(),
        Err(_) => return Ok((Value::String(rest.to_string()), Meta::new())),
    };

    let message = values.next().unwrap_or(Value::Null);
    let meta = match values.next() {
        None => Meta::new(),
        Some(Value::Object(map)) => map,
        Some(other) => bail!(StatusCode::InvalidJson, "meta must be a JSON object, got {}", other),
    };
    ensure!(
        values.next().is_none(),
        StatusCode::InvalidArgs,
        "usage: PUB <topic> [json] [meta-json]"
    );
    Ok((message, meta))
}

fn format_delivery(
    sub: &Subscription,
    topic: &str,
    message: &Payload,
    meta: &Meta,
) -> String {
    if meta.is_empty() {
        format!("#{} {} <- {}", sub.id(), topic, message)
    } else {
        format!("#{} {} <- {} {}", sub.id(), topic, message, Value::Object(meta.clone()))
    }
}

fn help() -> Vec<String> {
    [
        "SUB <topic> [limit] [filter-json]  subscribe (prints deliveries)",
        "UNSUB <topic>                      cancel subscriptions on exactly <topic>",
        "PUB <topic> [json] [meta-json]     publish a message",
        "CANCEL <id>                        cancel one subscription",
        "COUNT                              subscriptions per topic",
        "LIST                               live subscriptions of this session",
        "SANDBOX                            enter a nested sandbox",
        "LEAVE                              destroy the current sandbox",
        "HELP                               this help",
        "QUIT                               exit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Точка входа в CLI
fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if cli.quiet {
        settings.logging.level = "off".to_string();
    } else if cli.verbose {
        settings.logging.level = "debug".to_string();
    }
    if let Some(kind) = cli.filter_compiler {
        settings.broker.filter_compiler = kind.into();
    }
    init_logging(&settings.logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    debug!("Settings: {settings:?}");

    let mut session = Session::new(Broker::from_config(&settings.broker))
        .context("failed to start session")?;

    match &cli.command {
        Some(Commands::Interactive { history }) => interactive_mode(&mut session, history),
        Some(Commands::Exec { script }) => run_script(&mut session, script),
        None if cli.args.is_empty() => interactive_mode(&mut session, HISTORY_FILE),
        None => run_direct(&mut session, &cli.args.join(" ")),
    }
}

/// Баннер CLI
fn print_banner() {
    println!(
        "{} {} ({} built {})",
        "topicbus-cli".bold(),
        env!("CARGO_PKG_VERSION"),
        env!("TOPICBUS_GIT_COMMIT"),
        env!("TOPICBUS_BUILD_TIME")
    );
    println!("Type HELP for commands, QUIT to exit.");
}

fn print_lines(lines: &[String]) {
    for line in lines {
        if line.starts_with('#') {
            println!("{}", line.cyan());
        } else if line.starts_with('~') {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }
}

/// Текст ошибки для пользователя: контексты снаружи внутрь, затем
/// сообщение без внутренних деталей.
fn render_error(err: &StackError) -> String {
    let mut text = String::new();
    for ctx in err.contexts().iter().rev() {
        text.push_str(&ctx.message);
        text.push_str(" → ");
    }
    text.push_str(&err.client_message());
    text
}

fn report(err: &StackError) {
    let code = err.status_code().code();
    match err.log_level() {
        LogLevel::Error => error!(code, "{err:?}"),
        LogLevel::Warn => warn!(code, "{err}"),
        LogLevel::Info => info!(code, "{err}"),
        LogLevel::Debug | LogLevel::Trace => debug!(code, "{err}"),
    }
    eprintln!("{} [{}] {}", "error".red().bold(), code, render_error(err));
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Интерактивный режим (REPL)
fn interactive_mode(
    session: &mut Session,
    history: &str,
) -> Result<()> {
    print_banner();
    let history = expand_home(history);
    let mut editor = DefaultEditor::new().context("failed to start line editor")?;
    if editor.load_history(&history).is_err() {
        debug!("No history at {}", history.display());
    }

    loop {
        let prompt = format!("topicbus[{}]> ", session.sandboxes.len());
        match editor.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(e) = editor.add_history_entry(line.as_str()) {
                        debug!("Failed to record history entry: {e}");
                    }
                }
                match session.execute(&line) {
                    Ok(Outcome::Continue(lines)) => print_lines(&lines),
                    Ok(Outcome::Quit) => break,
                    Err(e) => report(&e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read line"),
        }
    }

    if let Err(e) = editor.save_history(&history) {
        debug!("Failed to save history to {}: {e}", history.display());
    }
    Ok(())
}

/// Выполнение скрипта; первая ошибка прерывает выполнение.
fn run_script(
    session: &mut Session,
    script: &Path,
) -> Result<()> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    for (n, line) in source.lines().enumerate() {
        let outcome = session
            .execute(line)
            .map_err(|e| e.context(format!("line {}", n + 1)))?;
        match outcome {
            Outcome::Continue(lines) => print_lines(&lines),
            Outcome::Quit => break,
        }
    }
    Ok(())
}

fn run_direct(
    session: &mut Session,
    commands: &str,
) -> Result<()> {
    for command in commands.split(';') {
        match session.execute(command)? {
            Outcome::Continue(lines) => print_lines(&lines),
            Outcome::Quit => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use topicbus::QueryCompiler;

    use super::*;

    fn run(
        session: &mut Session,
        line: &str,
    ) -> Vec<String> {
        match session.execute(line).unwrap() {
            Outcome::Continue(lines) => lines,
            Outcome::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["topicbus-cli", "exec", "script.txt"]);
        assert!(matches!(cli.command, Some(Commands::Exec { .. })));

        let cli = Cli::parse_from(["topicbus-cli", "--filter-compiler", "query", "COUNT"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.args, vec!["COUNT"]);
        assert!(matches!(cli.filter_compiler, Some(CompilerArg::Query)));
    }

    #[test]
    fn test_next_word() {
        assert_eq!(next_word("  SUB  a.b 3 "), ("SUB", "a.b 3 "));
        assert_eq!(next_word("COUNT"), ("COUNT", ""));
        assert_eq!(next_word(""), ("", ""));
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("").unwrap(), (Value::Null, Meta::new()));
        let (message, meta) = parse_payload(r#"{"a": 1} {"trace": "x"}"#).unwrap();
        assert_eq!(message, serde_json::json!({"a": 1}));
        assert_eq!(meta.get("trace"), Some(&serde_json::json!("x")));
        assert_eq!(
            parse_payload("hello world").unwrap().0,
            Value::String("hello world".into())
        );
        assert_eq!(
            parse_payload("1 2").unwrap_err().status_code(),
            StatusCode::InvalidJson
        );
    }

    /// Тест проверяет подписку, доставку и уведомления о топиках.
    #[test]
    fn test_sub_pub_flow() {
        let mut session = Session::new(Broker::new()).unwrap();
        assert_eq!(
            run(&mut session, "SUB a.*"),
            vec!["~ new topic a.*", "subscribed #1 to a.*"]
        );
        assert_eq!(run(&mut session, "PUB a.b 42"), vec!["#1 a.b <- 42"]);
        assert_eq!(run(&mut session, "pub x.y 1"), Vec::<String>::new());
        assert_eq!(run(&mut session, "COUNT"), vec!["a.*: 1"]);

        let lines = run(&mut session, "UNSUB a.*");
        assert_eq!(lines, vec!["~ empty topic a.*", "OK"]);
        assert_eq!(run(&mut session, "LIST"), vec!["(none)"]);
    }

    #[test]
    fn test_limit_and_filter() {
        let mut session = Session::new(Broker::with_compiler(Rc::new(QueryCompiler))).unwrap();
        run(&mut session, r#"SUB t 1 {"n": {"$gt": 1}}"#);
        assert!(run(&mut session, r#"PUB t {"n": 1}"#).is_empty());
        assert_eq!(
            run(&mut session, r#"PUB t {"n": 2}"#),
            vec![r#"#1 t <- {"n":2}"#, "~ empty topic t"]
        );
        assert_eq!(run(&mut session, "COUNT"), vec!["(empty)"]);
    }

    /// Тест проверяет, что неподдерживаемый дескриптор не оставляет
    /// подписку живой.
    #[test]
    fn test_rejected_filter_cancels_subscription() {
        let mut session = Session::new(Broker::new()).unwrap();
        let err = session.execute(r#"SUB t {"n": 1}"#).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfiguration);
        assert_eq!(err.contexts()[0].message, "SUB");
        assert_eq!(run(&mut session, "COUNT"), vec!["(empty)"]);
    }

    #[test]
    fn test_sandbox_leave_cancels() {
        let mut session = Session::new(Broker::new()).unwrap();
        run(&mut session, "SUB outer");
        assert_eq!(run(&mut session, "SANDBOX"), vec!["entered sandbox level 1"]);
        run(&mut session, "SUB inner");
        run(&mut session, "SUB inner");
        assert_eq!(run(&mut session, "COUNT"), vec!["inner: 2"]);

        let lines = run(&mut session, "LEAVE");
        assert_eq!(
            lines,
            vec!["~ empty topic inner", "left sandbox, cancelled 2 subscription(s)"]
        );
        assert_eq!(run(&mut session, "COUNT"), vec!["outer: 1"]);
        assert_eq!(
            session.execute("LEAVE").unwrap_err().status_code(),
            StatusCode::InvalidCommand
        );
    }

    #[test]
    fn test_errors_carry_status_codes() {
        let mut session = Session::new(Broker::new()).unwrap();
        let cases = [
            ("FROB", StatusCode::InvalidCommand),
            ("SUB a..b", StatusCode::InvalidTopic),
            ("SUB", StatusCode::InvalidArgs),
            ("CANCEL 99", StatusCode::SubscriptionNotFound),
            ("CANCEL x", StatusCode::InvalidArgs),
            ("PUB a 1 2", StatusCode::InvalidJson),
        ];
        for (line, code) in cases {
            assert_eq!(
                session.execute(line).unwrap_err().status_code(),
                code,
                "{line}"
            );
        }
        assert_eq!(session.execute("quit").unwrap(), Outcome::Quit);
        assert_eq!(session.execute("# comment").unwrap(), Outcome::Continue(Vec::new()));
    }

    #[test]
    fn test_run_script_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.txt");
        std::fs::write(&script, "SUB a\nPUB a 1\nCANCEL 7\n").unwrap();

        let mut session = Session::new(Broker::new()).unwrap();
        let err = run_script(&mut session, &script).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    /// Тест проверяет текст ошибки: контексты и пользовательское
    /// сообщение, внутренние детали скрыты.
    #[test]
    fn test_render_error() {
        let mut session = Session::new(Broker::new()).unwrap();
        let err = session
            .execute("SUB a..b")
            .map_err(|e| e.context("line 2"))
            .unwrap_err();
        assert_eq!(render_error(&err), "line 2 → SUB → invalid topic: \"a..b\"");
        assert_eq!(err.log_level(), LogLevel::Info);

        let internal = StackError::new(GenericError::new(StatusCode::Internal, "stack overflow"))
            .context("PUB");
        assert_eq!(render_error(&internal), "PUB → internal error");
        assert_eq!(internal.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_session_registers_topic_listeners() {
        let broker = Broker::new();
        let _session = Session::new(broker.clone()).unwrap();
        assert_eq!(broker.listener_count(EventKind::NewTopic), 1);
        assert_eq!(broker.listener_count(EventKind::EmptyTopic), 1);
    }
}
