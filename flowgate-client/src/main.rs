/**
 * FLOWGATE CLIENT - Client de démonstration de l'API d'admission
 *
 * RÔLE : Déroule le cycle de vie complet d'un transfert contre un kernel
 * FlowGate : soumission, lecture de l'avis, ajustement négocié, nouvel
 * avis, complétion puis dépôt du nettoyage.
 *
 * UTILITÉ : Vérification de bout en bout d'un déploiement, et modèle de
 * code pour écrire un vrai client de planificateur.
 */

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_BASE: &str = "http://127.0.0.1:8088";

struct FlowGate {
    http: Client,
    base: String,
    api_key: String,
}

impl FlowGate {
    fn new(base: String, api_key: String) -> Self {
        Self {
            http: Client::new(),
            base,
            api_key,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() && status.as_u16() != 202 {
            bail!("POST {path} → {status}: {value}");
        }
        Ok(value)
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .put(format!("{}{path}", self.base))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {path}"))?;
        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() {
            bail!("PUT {path} → {status}: {value}");
        }
        Ok(value)
    }
}

fn advice(transfer: &Value) -> (String, String) {
    let props = &transfer["properties"];
    (
        props["max_streams"].as_str().unwrap_or("?").to_string(),
        props["max_rate"].as_str().unwrap_or("?").to_string(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let base = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLOWGATE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE.to_string());
    let api_key = std::env::var("FLOWGATE_API_KEY").unwrap_or_default();
    let gate = FlowGate::new(base, api_key);

    let source = "gsiftp://server1.isi.edu/tmp/demo-src/";
    let destination = "gsiftp://client1.isi.edu/tmp/demo-dst/";

    // 1. soumission : le service rend un avis
    let transfer = gate
        .post(
            "/transfers",
            &json!({
                "source": source,
                "destination": destination,
                "properties": { "data_volume": "1024" }
            }),
        )
        .await?;
    let id = transfer["id"]
        .as_str()
        .context("le transfert admis doit porter un id")?
        .to_string();
    let (streams, rate) = advice(&transfer);
    println!("[client] admis {id}: {streams} flux, débit {rate}");

    // 2. négociation : le client ne prendra que 3 flux à 150. L'avis
    //    reste en place, sinon le service recalculerait dans la foulée.
    let mut properties = transfer["properties"].clone();
    properties["adjusted_streams"] = json!("3");
    properties["adjusted_rate"] = json!("150");
    let adjusted = gate
        .put(
            &format!("/transfers/{id}"),
            &json!({
                "source": source,
                "destination": destination,
                "properties": properties
            }),
        )
        .await?;
    let (streams, rate) = advice(&adjusted);
    println!("[client] ajustement enregistré (avis en place: {streams} flux, débit {rate})");

    // 3. nouvel avis, notre réservation ajustée exclue du calcul
    let refreshed = gate
        .put(
            &format!("/transfers/{id}"),
            &json!({
                "source": source,
                "destination": destination,
                "properties": {}
            }),
        )
        .await?;
    let (streams, rate) = advice(&refreshed);
    println!("[client] avis frais: {streams} flux, débit {rate}");

    // 4. complétion : la réservation quitte le grand livre
    gate.put(
        &format!("/transfers/{id}"),
        &json!({
            "source": source,
            "destination": destination,
            "properties": { "STATUS": "COMPLETED" }
        }),
    )
    .await?;
    println!("[client] transfert terminé");

    // 5. nettoyage de la destination (retenu tant qu'elle est partagée)
    let cleanup = gate
        .post("/cleanups", &json!({ "uri": destination, "properties": {} }))
        .await?;
    if cleanup["status"] == "withheld" {
        println!("[client] nettoyage retenu, d'autres jobs partagent la destination");
    } else {
        println!(
            "[client] nettoyage exécutable, id {}",
            cleanup["id"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}
