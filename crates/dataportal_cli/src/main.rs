//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `dataportal_core` linkage.
//! - Start file logging under the scratch directory from the same settings
//!   the portal reads.
//! - Run one insert/get/query/delete round trip through a local portal and
//!   through a loopback remote portal against a throwaway SQLite file.
//! - Keep output deterministic for quick local sanity checks.

use dataportal_core::{
    core_version, init_logging_from_settings, logging_status, DataAccessFactory, DataPortal,
    Entity, EntityMapping, EntityStamp, FieldDirective, LoopbackConnector, PortalEnvironment,
    PortalServer, Settings,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

const LOOPBACK_ENDPOINT: &str = "loop://smoke";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Probe {
    stamp: EntityStamp,
    label: String,
}

impl Entity for Probe {
    const TYPE_NAME: &'static str = "Probe";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new().field(
            FieldDirective::scalar("label", |p: &Self| &p.label, |p: &mut Self| &mut p.label)
                .column("Label"),
        )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("dataportal_core version={}", core_version());

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("smoke.db");
    let log_dir = dir.path().join("logs");

    let logging = settings(&path, "local")
        .with("LogDir", log_dir.display().to_string())
        .with("LogLevel", "info")
        .with("LogLevel.Probe", "debug");
    init_logging_from_settings(&logging)?;
    if let Some(config) = logging_status() {
        println!("logging level={}", config.level());
    }

    rusqlite::Connection::open(&path)?.execute_batch(
        "CREATE TABLE ProbeInfo (
            UID TEXT PRIMARY KEY,
            CreateTime INTEGER NOT NULL,
            UpdateTime INTEGER NOT NULL,
            Label TEXT
        )",
    )?;

    let local = Arc::new(DataAccessFactory::from_settings(settings(&path, "local"))?);
    local.register::<Probe>()?;
    let local_env = PortalEnvironment::new(Arc::clone(&local))?;
    round_trip("local", DataPortal::new(Arc::new(local_env)))?;

    let connector = LoopbackConnector::new();
    connector.serve(LOOPBACK_ENDPOINT, Arc::new(PortalServer::new(local)));
    let client = DataAccessFactory::from_settings(settings(&path, "remote"))?;
    let remote_env =
        PortalEnvironment::new(Arc::new(client))?.with_connector(Arc::new(connector));
    round_trip("remote", DataPortal::new(Arc::new(remote_env)))?;

    Ok(())
}

fn settings(path: &Path, client: &str) -> Settings {
    Settings::from_pairs([
        (
            "ConnectionStrings.DbConnectionString".to_string(),
            format!("Data Source={}", path.display()),
        ),
        ("DataPortalClient".to_string(), client.to_string()),
        ("DataPortalUrl".to_string(), LOOPBACK_ENDPOINT.to_string()),
    ])
}

fn round_trip(mode: &str, portal: DataPortal<Probe>) -> Result<(), Box<dyn Error>> {
    let mut probe = Probe {
        label: format!("{mode} probe"),
        ..Probe::default()
    };
    let inserted = portal.insert(&mut probe)?;
    let found = portal.get(probe.uid())?.is_some();
    let listed = portal.query_all()?.len();
    let deleted = portal.delete(&probe)?;
    info!(
        "event=smoke_round_trip module=cli status=ok mode={} remote={}",
        mode,
        portal.is_remote()?
    );
    println!(
        "portal={mode} inserted={inserted} found={found} listed={listed} deleted={deleted}"
    );
    Ok(())
}
