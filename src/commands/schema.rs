//! `gt schema` — JSON Schemas for the town's config files.

use clap::Args;
use schemars::schema_for;

use crate::config::{
    AccountsConfig, DaemonConfig, RigConfig, RigSettings, RigsRegistry, TownConfig,
};

#[derive(Debug, Args)]
pub struct SchemaArgs;

impl SchemaArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let schemas = serde_json::json!({
            "mayor/town.json": schema_for!(TownConfig),
            "mayor/rigs.json": schema_for!(RigsRegistry),
            "mayor/accounts.json": schema_for!(AccountsConfig),
            "mayor/daemon.json": schema_for!(DaemonConfig),
            "<rig>/config.json": schema_for!(RigConfig),
            "<rig>/settings/config.json": schema_for!(RigSettings),
        });
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        Ok(())
    }
}
