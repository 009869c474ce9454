//! `gt start` — scaffold (or boot) a town.

use std::path::PathBuf;

use clap::Args;
use dialoguer::Confirm;

use crate::config::{DaemonConfig, RigsRegistry, TownConfig};

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Town root (default: current directory)
    pub path: Option<PathBuf>,
    /// Town name (default: directory name)
    #[arg(long)]
    pub name: Option<String>,
    /// Skip confirmation prompts
    #[arg(long)]
    pub yes: bool,
}

impl StartArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = match self.path.clone() {
            Some(path) => path,
            None => std::env::current_dir()?,
        };

        let marker = root.join("mayor").join("town.json");
        if marker.is_file() {
            let existing = TownConfig::load(&marker)?;
            println!("town {} already exists at {}", existing.name, root.display());
            return Ok(());
        }

        let name = self.name.clone().unwrap_or_else(|| {
            root.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("gastown")
                .to_string()
        });

        let occupied = root.is_dir()
            && std::fs::read_dir(&root).map(|mut d| d.next().is_some()).unwrap_or(false);
        if occupied && !self.yes {
            let proceed = Confirm::new()
                .with_prompt(format!(
                    "{} is not empty — create town {name:?} here anyway?",
                    root.display()
                ))
                .default(false)
                .interact()?;
            if !proceed {
                println!("aborted");
                return Ok(());
            }
        }

        let town = TownConfig {
            kind: "town".to_string(),
            version: 1,
            name: name.clone(),
            owner: None,
            public_name: None,
        };
        town.save(&marker)?;
        RigsRegistry::default().save(&root.join("mayor").join("rigs.json"))?;
        DaemonConfig::default().save(&root.join("mayor").join("daemon.json"))?;
        std::fs::create_dir_all(root.join(".beads"))?;
        std::fs::create_dir_all(root.join("deacon"))?;

        println!("town {name} created at {}", root.display());
        println!("next:");
        println!("  - register a rig in mayor/rigs.json");
        println!("  - add its prefix to mayor/routes.jsonl");
        println!("  - `gt sling <bead> <rig>` to dispatch the first polecat");
        Ok(())
    }
}
