use clap::Parser;
use cli9::{ScopeKey, Shell};
use cli9_config::{Cli9Config, LogFormat, LoggingConfig, ShellConfig};
use cli9_sdk::{Caller, ValueStream};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod completer;

/// How long the prompt waits for a command before taking the next line.
const PROMPT_WAIT: Duration = Duration::from_millis(500);

/// cli9 - Scriptable shell over an inode-addressed virtual filesystem
#[derive(Parser, Debug)]
#[command(name = "cli9", version, about)]
struct Args {
    /// Execute command and exit
    #[arg(short = 'c')]
    command: Option<String>,

    /// Script file to execute
    script: Option<String>,

    /// Configuration file, instead of the default locations
    #[arg(long)]
    config: Option<String>,

    /// User id to act as
    #[arg(long)]
    user: Option<u64>,

    /// Guild id to act in
    #[arg(long)]
    guild: Option<u64>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.directive()));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(layer.pretty()).init(),
        LogFormat::Json => registry.with(layer.json()).init(),
        LogFormat::Compact => registry.with(layer.compact()).init(),
    }
}

fn print_stream(stream: &ValueStream) {
    let rendered = stream.render();
    if !rendered.is_empty() {
        println!("{rendered}");
    }
}

/// Exit status of a finished command: 1 when it produced a real error.
fn status(stream: &ValueStream) -> i32 {
    i32::from(stream.errors().any(|e| !e.is_ignorable()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => cli9_config::load_from_file(path)?,
        None => cli9_config::load().unwrap_or_else(|_| Cli9Config::default()),
    };
    init_logging(&config.logging);

    let user = args.user.unwrap_or(config.shell.user_id);
    let caller = match args.guild.or(config.shell.guild_id) {
        Some(guild) => Caller::member(user, guild),
        None => Caller::user(user),
    };
    let shell_config = config.shell.clone();
    let shell = Shell::builder().config(config).build().await?;

    for rc in &shell_config.rc_files {
        let path = cli9_config::expand_path(rc);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => print_stream(&shell.execute(caller.clone(), &text).await),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read rc file"),
        }
    }

    if let Some(command) = args.command {
        let result = shell.execute(caller, &command).await;
        print_stream(&result);
        std::process::exit(status(&result));
    } else if let Some(script_path) = args.script {
        match tokio::fs::read_to_string(&script_path).await {
            Ok(content) => {
                let result = shell.execute(caller, &content).await;
                print_stream(&result);
                std::process::exit(status(&result));
            }
            Err(e) => {
                eprintln!("cli9: cannot read '{script_path}': {e}");
                std::process::exit(1);
            }
        }
    } else {
        run_repl(shell, caller, shell_config).await?;
    }

    Ok(())
}

/// A line typed at the prompt; `done` fires once its output is printed.
struct Line {
    text: String,
    done: std_mpsc::Sender<()>,
}

/// Read lines on a thread of their own so commands keep running while the
/// prompt waits. That lets `read` take the next line, and `kill` reach a
/// command that is still sleeping.
async fn run_repl(
    shell: Arc<Shell>,
    caller: Caller,
    shell_config: ShellConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<Line>();
    let reader = {
        let shell = Arc::clone(&shell);
        let caller = caller.clone();
        let runtime = tokio::runtime::Handle::current();
        std::thread::spawn(move || prompt_loop(&shell, &caller, &shell_config, runtime, &lines_tx))
    };

    while let Some(line) = lines_rx.recv().await {
        let invocation = shell.spawn(caller.clone(), &line.text);
        debug!(pid = invocation.pid, "console invocation");
        tokio::spawn(async move {
            print_stream(&invocation.wait().await);
            let _ = line.done.send(());
        });
    }

    match reader.join() {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err("prompt thread panicked".into()),
    }
}

fn prompt_loop(
    shell: &Arc<Shell>,
    caller: &Caller,
    shell_config: &ShellConfig,
    runtime: tokio::runtime::Handle,
    lines: &mpsc::UnboundedSender<Line>,
) -> rustyline::Result<()> {
    use completer::Cli9Helper;
    use rustyline::error::ReadlineError;
    use rustyline::history::DefaultHistory;
    use rustyline::{CompletionType, Config, Editor};

    let rl_config = Config::builder()
        .completion_type(CompletionType::List)
        .max_history_size(shell_config.history.max_entries)?
        .history_ignore_dups(true)?
        .history_ignore_space(true)
        .build();
    let mut rl: Editor<Cli9Helper, DefaultHistory> = Editor::with_config(rl_config)?;
    rl.set_helper(Some(Cli9Helper::new(Arc::clone(shell), caller.clone(), runtime)));

    let history_path = shell_config.history.path();
    if shell_config.history.enabled {
        let _ = rl.load_history(&history_path);
    }

    println!("cli9 v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' to quit, 'commands' for commands.");
    println!();

    let key = ScopeKey::of(caller);
    loop {
        let cwd = shell
            .scope(key)
            .directory()
            .map_or_else(|| "/".to_string(), |dir| dir.short(key.kind()));
        match rl.readline(&shell_config.render_prompt(&cwd)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if line == "exit" || line == "quit" {
                    break;
                }
                let (done, finished) = std_mpsc::channel();
                let sent = lines.send(Line {
                    text: line.to_string(),
                    done,
                });
                if sent.is_err() {
                    break;
                }
                let _ = finished.recv_timeout(PROMPT_WAIT);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                break;
            }
            Err(err) => return Err(err),
        }
    }

    if shell_config.history.enabled {
        let _ = rl.save_history(&history_path);
    }
    Ok(())
}
