mod cli;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rusqlite::Connection;

use assignmint::client::{Role, SqliteSource, Store};
use assignmint::config::Config;
use assignmint::dispatch::Dispatcher;
use assignmint::model::TaskStatus;
use assignmint::watch::DbWatcher;
use assignmint::worker::TriggerWorker;
use assignmint::{db, http, ops, output, paths, push, resolver};

use cli::{ChatCommand, Cli, Command, TaskCommand, UserCommand};

fn setup_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

fn ensure_db_dir(db_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn open_db(db_path: &str) -> Result<Connection> {
    let conn = db::open(db_path)?;
    db::init(&conn)?;
    Ok(conn)
}

fn dispatcher(config: &Config) -> Result<Dispatcher> {
    Ok(Dispatcher::new(push::from_config(&config.push)?))
}

/// Cleared by Ctrl-C / SIGTERM.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set signal handler")?;
    Ok(running)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();
    let config = Config::load()?;
    let db_path = paths::resolve_db_path(cli.db.as_deref(), config.store.path.as_deref());
    ensure_db_dir(&db_path)?;

    match cli.command {
        Command::Init => {
            open_db(&db_path)?;
            eprintln!("Initialized {db_path}");
        }

        Command::User(cmd) => run_user(&open_db(&db_path)?, cmd)?,
        Command::Task(cmd) => run_task(&open_db(&db_path)?, cmd)?,
        Command::Chat(cmd) => run_chat(&open_db(&db_path)?, cmd)?,

        Command::Notifications { user, unread, json } => {
            let conn = open_db(&db_path)?;
            let records = ops::list_notifications(&conn, &user, unread)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", output::format_notifications(&records));
            }
        }

        Command::Read { id } => {
            let conn = open_db(&db_path)?;
            if !ops::mark_read(&conn, id)? {
                bail!("notification {id} not found");
            }
            eprintln!("Marked notification {id} as read");
        }

        Command::Stats { user } => {
            let conn = open_db(&db_path)?;
            let stats = ops::user_stats(&conn, &user)?
                .with_context(|| format!("user '{user}' not found"))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Process => {
            let worker = trigger_worker(&db_path, &config)?;
            let report = worker.process_pending()?;
            eprintln!(
                "{} pushed, {} skipped, {} recorded, {} counters, {} failed",
                report.pushed, report.skipped, report.recorded, report.incremented, report.failed
            );
        }

        Command::Triggers => {
            let worker = trigger_worker(&db_path, &config)?;
            let watcher = DbWatcher::new(&db_path)?;
            let running = interrupt_flag()?;
            worker.run(&watcher, config.triggers.poll_interval(), &running);
        }

        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.http.bind_addr().to_string());
            let state = http::AppState::new(open_db(&db_path)?, dispatcher(&config)?);
            let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            rt.block_on(http::serve(&bind, state))?;
        }

        Command::Prune { days } => {
            let Some(days) = days.or(config.retention.days) else {
                bail!("no retention period: pass --days or set [retention] days");
            };
            if days == 0 {
                bail!("--days must be positive");
            }
            let conn = open_db(&db_path)?;
            let removed = ops::prune_notifications(&conn, days)?;
            eprintln!("Removed {removed} notification(s) older than {days} day(s)");
        }

        Command::Client { user, role } => {
            let role = Role::parse(&role)?;
            ops::get_user(&open_db(&db_path)?, &user)?;
            let running = interrupt_flag()?;
            let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            rt.block_on(run_client(
                &db_path,
                user,
                role,
                config.triggers.poll_interval(),
                &running,
            ))?;
        }
    }

    Ok(())
}

fn trigger_worker(db_path: &str, config: &Config) -> Result<TriggerWorker> {
    Ok(TriggerWorker::new(
        open_db(db_path)?,
        dispatcher(config)?,
        resolver::from_name(config.triggers.resolver_name())?,
    ))
}

fn run_user(conn: &Connection, cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::Add { id, name, token } => {
            ops::add_user(conn, &id, &name, token.as_deref())?;
            eprintln!("Added user '{id}'");
        }
        UserCommand::Token { id, token } => {
            ops::set_push_token(conn, &id, token.as_deref())?;
            match token {
                Some(_) => eprintln!("Updated push token for '{id}'"),
                None => eprintln!("Cleared push token for '{id}'"),
            }
        }
        UserCommand::Show { id, json } => {
            let user = ops::get_user(conn, &id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                print!("{}", output::format_user(&user));
            }
        }
    }
    Ok(())
}

fn run_task(conn: &Connection, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::Post {
            id,
            title,
            subject,
            by,
            desc,
        } => {
            ops::post_task(conn, &id, &title, &subject, &desc, &by)?;
            eprintln!("Posted task '{id}'");
        }
        TaskCommand::Accept { id, expert } => {
            ops::accept_task(conn, &id, &expert)?;
            eprintln!("'{expert}' accepted '{id}'");
        }
        TaskCommand::Complete { id } => {
            ops::complete_task(conn, &id)?;
            eprintln!("Completed '{id}'");
        }
        TaskCommand::Cancel { id } => {
            ops::cancel_task(conn, &id)?;
            eprintln!("Cancelled '{id}'");
        }
        TaskCommand::Show { id, json } => {
            let task = ops::get_task(conn, &id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print!("{}", output::format_task_detail(&task));
            }
        }
        TaskCommand::List { status, json } => {
            let status = status.map(|s| TaskStatus::parse(&s)).transpose()?;
            let tasks = ops::list_tasks(conn, status)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print!("{}", output::format_task_list(&tasks));
            }
        }
    }
    Ok(())
}

fn run_chat(conn: &Connection, cmd: ChatCommand) -> Result<()> {
    match cmd {
        ChatCommand::Open { id, a, b, task } => {
            ops::open_chat(conn, &id, [a.as_str(), b.as_str()], task.as_deref())?;
            eprintln!("Opened chat '{id}' between '{a}' and '{b}'");
        }
        ChatCommand::Send { chat, from, text } => {
            let id = ops::send_message(conn, &chat, &from, &text)?;
            eprintln!("Sent message {id} to '{chat}'");
        }
        ChatCommand::Show { id, json } => {
            let chat = ops::get_chat(conn, &id)?;
            let messages = ops::list_messages(conn, &id)?;
            if json {
                let value = serde_json::json!({ "chat": chat, "messages": messages });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print!("{}", output::format_chat(&chat, &messages));
            }
        }
    }
    Ok(())
}

/// Drive a client store from the local database until interrupted: every
/// database change refreshes the task list and resets the unread count.
async fn run_client(
    db_path: &str,
    user: String,
    role: Role,
    poll: Duration,
    running: &AtomicBool,
) -> Result<()> {
    let inbox = open_db(db_path)?;
    let store = Store::new(SqliteSource::new(open_db(db_path)?), user, role);
    let _subscription = store.subscribe(|state| println!("{}", output::format_state(state)));
    let watcher = DbWatcher::new(db_path)?;

    store.initialize().await?;
    info!("Client store ready for {}", store.user_id());
    while running.load(Ordering::SeqCst) {
        store.set_unread(ops::unread_count(&inbox, store.user_id())?);
        store.refresh().await?;
        tokio::task::block_in_place(|| watcher.wait(poll));
    }
    Ok(())
}
