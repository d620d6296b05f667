//! Terminal output: status-line macros and the discovery notifier.
//!
//! Greppable mode silences everything that is not machine-parsable;
//! accessible mode drops colour and decorations for screen readers.

use colored::Colorize;

use crate::record::ServerRecord;

/// Prints a status line, "[~]" prefixed, unless greppable mode is on.
#[macro_export]
macro_rules! detail {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                use colored::Colorize as _;
                println!("{} {}", "[~]".blue().bold(), $name);
            }
        }
    };
}

/// Prints a warning line, "[!]" prefixed, unless greppable mode is on.
#[macro_export]
macro_rules! warning {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                use colored::Colorize as _;
                println!("{} {}", "[!]".red().bold(), $name);
            }
        }
    };
}

/// Prints a result line, "[>]" prefixed, unless greppable mode is on.
#[macro_export]
macro_rules! output {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                use colored::Colorize as _;
                println!("{} {}", "[>]".green().bold(), $name);
            }
        }
    };
}

/// Receives discovery events synchronously, as classification happens.
pub trait Notify: Send + Sync {
    /// One event per answering probe, new and known sightings alike.
    fn server_found(&self, record: &ServerRecord, is_new: bool);
}

/// Renders discovery events for the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleNotifier {
    /// Machine-parsable single-line output.
    pub greppable: bool,
    /// Screen-reader friendly output.
    pub accessible: bool,
}

impl Notify for ConsoleNotifier {
    fn server_found(&self, record: &ServerRecord, is_new: bool) {
        let state = if is_new { "NEW" } else { "KNOWN" };

        if self.greppable {
            println!(
                "{} {} {} {}/{}",
                record.identity(),
                state,
                record.version,
                record.players_online,
                record.players_max
            );
            return;
        }

        if self.accessible {
            println!("\nMinecraft server {state}");
            println!("Address: {}", record.identity());
            println!(
                "Version: {} (protocol {})",
                record.version, record.protocol
            );
            println!(
                "Players: {}/{}",
                record.players_online, record.players_max
            );
            println!("Description: {}", record.description);
            println!("Ping: {:.0}ms", record.ping_ms);
            return;
        }

        println!(
            "\n{}",
            format!("=== MINECRAFT SERVER {state} ===").green().bold()
        );
        println!("{} {}", "Address:".yellow(), record.identity());
        println!(
            "{} {} (protocol {})",
            "Version:".yellow(),
            record.version,
            record.protocol
        );
        println!(
            "{} {}/{}",
            "Players:".yellow(),
            record.players_online,
            record.players_max
        );
        println!("{} {}", "Description:".yellow(), record.description);
        println!("{} {:.0}ms", "Ping:".yellow(), record.ping_ms);
        println!("{}", "=============================".green());
    }
}
