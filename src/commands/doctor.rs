//! `gt doctor` — validate the town and its companion tools.

use std::io::IsTerminal;

use clap::Args;
use serde::{Deserialize, Serialize};

use super::Invocation;
use crate::beads::redirect;
use crate::identity::{IdentityLock, lock_path, pid_alive};
use crate::subprocess::Tool;

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Apply automatic remediations (stale locks, self-redirects)
    #[arg(long)]
    pub fix: bool,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub town: String,
    pub tools: Vec<ToolStatus>,
    pub issues: Vec<String>,
    pub fixed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let invocation = Invocation::resolve()?;
        let mut report = DoctorReport {
            town: invocation.town.config.name.clone(),
            tools: vec![],
            issues: vec![],
            fixed: vec![],
        };

        for tool in ["bd", "tmux", "git"] {
            let version = Tool::new(tool).arg("--version").run();
            match version {
                Ok(output) if output.success() => report.tools.push(ToolStatus {
                    name: tool.to_string(),
                    present: true,
                    version: Some(output.stdout.lines().next().unwrap_or("").to_string()),
                }),
                _ => {
                    report.tools.push(ToolStatus {
                        name: tool.to_string(),
                        present: false,
                        version: None,
                    });
                    report.issues.push(format!("tool not found: {tool}"));
                }
            }
        }

        self.check_layout(&invocation, &mut report);
        self.check_workspaces(&invocation, &mut report);

        let format = self.format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Text
            }
        });
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Pretty | OutputFormat::Text => {
                println!("town: {}", report.town);
                for tool in &report.tools {
                    let mark = if tool.present { "ok " } else { "MISSING" };
                    println!(
                        "  [{mark}] {} {}",
                        tool.name,
                        tool.version.as_deref().unwrap_or("")
                    );
                }
                for fixed in &report.fixed {
                    println!("  fixed: {fixed}");
                }
                for issue in &report.issues {
                    println!("  issue: {issue}");
                }
                if report.issues.is_empty() {
                    println!("all clear");
                }
            }
        }

        if report.issues.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ExitError::Other(format!(
                "{} issue(s) found",
                report.issues.len()
            ))
            .into())
        }
    }

    fn check_layout(&self, invocation: &Invocation, report: &mut DoctorReport) {
        let mayor = invocation.town.mayor_dir();
        for file in ["town.json", "rigs.json"] {
            if !mayor.join(file).is_file() {
                report.issues.push(format!("missing mayor/{file}"));
            }
        }
        let Ok(registry) = invocation.town.rigs() else {
            report.issues.push("unreadable mayor/rigs.json".to_string());
            return;
        };
        for rig in registry.rigs.keys() {
            if !invocation.town.rig_clone(rig).is_dir() {
                report
                    .issues
                    .push(format!("rig {rig}: canonical clone missing"));
            }
        }
    }

    /// Walk polecat workspaces for stale locks and circular redirects.
    fn check_workspaces(&self, invocation: &Invocation, report: &mut DoctorReport) {
        let Ok(registry) = invocation.town.rigs() else {
            return;
        };
        for rig in registry.rigs.keys() {
            let polecats = invocation.town.rig_dir(rig).join("polecats");
            let Ok(entries) = std::fs::read_dir(&polecats) else {
                continue;
            };
            for entry in entries.filter_map(std::result::Result::ok) {
                let workdir = entry.path();
                if !workdir.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();

                // Stale identity lock?
                let lock_file = lock_path(&workdir);
                if let Ok(contents) = std::fs::read_to_string(&lock_file)
                    && let Ok(lock) = serde_json::from_str::<IdentityLock>(&contents)
                    && !pid_alive(lock.pid)
                {
                    if self.fix {
                        let _ = std::fs::remove_file(&lock_file);
                        report.fixed.push(format!("{rig}/{name}: removed stale lock"));
                    } else {
                        report.issues.push(format!(
                            "{rig}/{name}: stale identity lock (dead pid {})",
                            lock.pid
                        ));
                    }
                }

                // Self-redirects delete themselves on resolve; running the
                // resolver here IS the fix.
                let redirect_file = workdir.join(".beads").join("redirect");
                if redirect_file.is_file() {
                    let before = std::fs::read_to_string(&redirect_file).unwrap_or_default();
                    if self.fix {
                        let _ = redirect::resolve(&workdir);
                        if !redirect_file.is_file() {
                            report
                                .fixed
                                .push(format!("{rig}/{name}: removed circular redirect"));
                        }
                    } else if redirect::clean_path(&workdir.join(before.trim()))
                        == redirect::clean_path(&workdir.join(".beads"))
                    {
                        report
                            .issues
                            .push(format!("{rig}/{name}: circular beads redirect"));
                    }
                }
            }
        }
    }
}
