//! `gt mail` — store-backed agent mail.

use clap::{Args, Subcommand};

use super::Invocation;
use crate::beads::{IssueStore, MailDraft, MailPriority};

#[derive(Debug, Args)]
pub struct MailArgs {
    #[command(subcommand)]
    pub command: MailCommand,
}

#[derive(Debug, Subcommand)]
pub enum MailCommand {
    /// Send a message to an agent address
    Send {
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// List this agent's inbox
    Inbox {
        /// Unread only
        #[arg(long)]
        unread: bool,
    },
    /// Read one message (marks it read)
    Read { id: String },
    /// Acknowledge a message without printing it
    Ack { id: String },
}

impl MailArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        let store = invocation.store();

        match &self.command {
            MailCommand::Send {
                to,
                subject,
                body,
                priority,
            } => {
                let priority = match priority.as_str() {
                    "low" => MailPriority::Low,
                    "high" => MailPriority::High,
                    "urgent" => MailPriority::Urgent,
                    _ => MailPriority::Normal,
                };
                store.mail_send(&MailDraft {
                    to: to.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                    priority,
                })?;
                println!("sent to {to}");
            }
            MailCommand::Inbox { unread } => {
                let inbox = store.mail_inbox(*unread)?;
                if inbox.is_empty() {
                    println!("inbox empty");
                }
                for message in inbox {
                    let marker = if message.read { " " } else { "*" };
                    println!(
                        "{marker} {} [{}] {} — from {}",
                        message.id, message.priority, message.subject, message.from
                    );
                }
            }
            MailCommand::Read { id } => {
                let message = store.mail_read(id)?;
                println!("from:    {}", message.from);
                println!("subject: {}", message.subject);
                if let Some(ts) = message.timestamp {
                    println!("at:      {ts}");
                }
                if !message.body.is_empty() {
                    println!("\n{}", message.body);
                }
            }
            MailCommand::Ack { id } => {
                store.mail_ack(id)?;
                println!("acked {id}");
            }
        }
        Ok(())
    }
}
