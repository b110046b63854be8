use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "assignmint", about = "Notification core for the AssignMint task marketplace")]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.assignmint/assignmint.db]
    #[arg(long, env = "ASSIGNMINT_DB", global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Manage user profiles
    #[command(subcommand)]
    User(UserCommand),

    /// Post and move tasks through their lifecycle
    #[command(subcommand)]
    Task(TaskCommand),

    /// Open chats and send messages
    #[command(subcommand)]
    Chat(ChatCommand),

    /// List a user's notification records, newest first
    Notifications {
        /// User id
        user: String,
        /// Only unread records
        #[arg(long)]
        unread: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a notification record as read
    Read {
        /// Notification id
        id: i64,
    },

    /// Show a user's stats (same payload as GET /getUserStats)
    Stats {
        /// User id
        user: String,
    },

    /// Drain the change outbox once and exit
    Process,

    /// Run the trigger worker until interrupted
    Triggers,

    /// Serve the HTTP endpoints
    Serve {
        /// Address to bind [default: from config, else 127.0.0.1:8787]
        #[arg(long)]
        bind: Option<String>,
    },

    /// Delete old notification records
    Prune {
        /// Age in days [default: retention.days from config]
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run the client state store against the local database
    Client {
        /// User id the client is signed in as
        user: String,
        /// Starting role (requester, expert)
        #[arg(long, default_value = "requester")]
        role: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Create a user profile
    Add {
        /// User id (alphanumeric, hyphens, underscores)
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Device push token
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Set or clear a user's push token
    Token {
        /// User id
        id: String,
        /// New token (omit to clear)
        token: Option<String>,
    },

    /// Show a user profile
    Show {
        /// User id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Post a new task
    Post {
        /// Task id (alphanumeric, hyphens, underscores)
        id: String,
        /// Task title
        #[arg(short, long)]
        title: String,
        /// Subject area
        #[arg(short, long, default_value = "")]
        subject: String,
        /// Requester posting the task
        #[arg(long)]
        by: String,
        /// Task description
        #[arg(short, long, default_value = "")]
        desc: String,
    },

    /// Accept an open task as an expert
    Accept {
        /// Task id
        id: String,
        /// Expert taking the task
        #[arg(short, long)]
        expert: String,
    },

    /// Mark an in-progress task as completed
    Complete {
        /// Task id
        id: String,
    },

    /// Cancel a task
    Cancel {
        /// Task id
        id: String,
    },

    /// Show task details
    Show {
        /// Task id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Open a two-person chat
    Open {
        /// Chat id
        id: String,
        /// First participant
        a: String,
        /// Second participant
        b: String,
        /// Task the chat is about
        #[arg(long)]
        task: Option<String>,
    },

    /// Send a message to a chat
    Send {
        /// Chat id
        chat: String,
        /// Sender (must be a participant)
        #[arg(short, long)]
        from: String,
        /// Message text
        text: String,
    },

    /// Show a chat and its messages
    Show {
        /// Chat id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
