/**
 * FLOWGATE KERNEL - Point d'entrée du service d'admission des transferts
 *
 * RÔLE : Orchestration de tous les modules : config, grand livre, règles,
 * session, façade, HTTP. Bootstrap complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : Façade verrouillée par session + grand livre partagé entre
 * instances + API REST.
 * UTILITÉ : Donne aux planificateurs un avis de flux et de débit qui respecte
 * les plafonds du site, quel que soit le nombre d'instances déployées.
 */

mod caps;
mod config;
mod entity;
mod facade;
mod http;
mod ledger;
mod monitor;
mod policy;
mod registry;
mod session;
mod stats;
mod store;

use crate::caps::CapTable;
use crate::config::{Config, LedgerConfig, MonitorConfig};
use crate::facade::PolicyFacade;
use crate::http::AppState;
use crate::ledger::file::FileLedger;
use crate::ledger::sql::SqlLedger;
use crate::ledger::AllocationLedger;
use crate::monitor::{NullMonitor, PassiveMonitor, TableMonitor};
use crate::policy::{
    AdmissionRule, DEFAULT_MAX_RATE_GLOBAL, DEFAULT_MAX_STREAMS_GLOBAL,
};
use crate::session::DecisionSession;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

fn load_caps(path: Option<&Path>, label: &str) -> CapTable {
    let Some(path) = path else {
        println!("[kernel] pas de table {label}, avis au défaut seul");
        return CapTable::empty();
    };
    match CapTable::load(path) {
        Ok(table) => {
            println!("[kernel] table {label} chargée depuis {}", path.display());
            table
        }
        Err(e) => {
            eprintln!("[kernel] échec de la table {label}: {e}");
            std::process::exit(1);
        }
    }
}

fn build_monitor(monitor: Option<&MonitorConfig>) -> Box<dyn PassiveMonitor> {
    let Some(monitor) = monitor else {
        return Box::new(NullMonitor);
    };
    let streams = load_caps(monitor.streams_file.as_deref(), "observations-flux");
    let rate = load_caps(monitor.rate_file.as_deref(), "observations-débit");
    Box::new(TableMonitor::new(streams, rate))
}

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[kernel] configuration illisible: {e}");
            std::process::exit(1);
        }
    };

    // grand livre partagé entre les instances du site
    let ledger: Arc<dyn AllocationLedger> = match &cfg.ledger {
        LedgerConfig::File { path } => {
            println!("[kernel] grand livre fichiers dans {}", path.display());
            Arc::new(FileLedger::new(path.clone()))
        }
        LedgerConfig::Sql { database_url } => match SqlLedger::connect(database_url).await {
            Ok(ledger) => {
                println!("[kernel] grand livre SQL sur {database_url}");
                Arc::new(ledger)
            }
            Err(e) => {
                eprintln!("[kernel] échec du grand livre SQL: {e}");
                std::process::exit(1);
            }
        },
    };

    let stream_caps = load_caps(cfg.stream_caps_file.as_deref(), "plafonds-flux");
    let rate_caps = load_caps(cfg.rate_caps_file.as_deref(), "plafonds-débit");
    let monitor = build_monitor(cfg.monitor.as_ref());

    // session de décision avec la règle d'admission du site
    let session = DecisionSession::new(
        ledger,
        stream_caps,
        rate_caps,
        monitor,
        vec![Box::new(AdmissionRule)],
    );
    for (name, value) in [
        (DEFAULT_MAX_STREAMS_GLOBAL, cfg.default_max_streams as f64),
        (DEFAULT_MAX_RATE_GLOBAL, cfg.default_max_rate),
    ] {
        if let Err(e) = session.set_global(name, value).await {
            eprintln!("[kernel] amorçage de {name} impossible: {e}");
            std::process::exit(1);
        }
    }

    let facade = Arc::new(PolicyFacade::new(session));
    let app = http::build_router(AppState {
        facade: facade.clone(),
    });

    println!("[kernel] listening on http://{}", cfg.listen_addr);
    let listener = match TcpListener::bind(&cfg.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("[kernel] bind {} impossible: {e}", cfg.listen_addr);
            std::process::exit(1);
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        println!("[kernel] arrêt demandé");
    });
    if let Err(e) = serve.await {
        eprintln!("[kernel] serveur interrompu: {e}");
    }

    // nos réservations ne doivent pas survivre à l'instance
    if let Err(e) = facade.shutdown().await {
        eprintln!("[kernel] nettoyage du grand livre incomplet: {e}");
    } else {
        println!("[kernel] réservations retirées du grand livre");
    }
}
