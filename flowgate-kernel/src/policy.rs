/**
 * POLITIQUE D'ADMISSION - Règles de site et calcul d'avis
 *
 * RÔLE :
 * Calcule, pour chaque transfert qui n'en a pas encore, un avis de flux
 * parallèles (max_streams) et de débit (max_rate), en partageant les
 * plafonds du site entre toutes les instances via le grand livre.
 *
 * FONCTIONNEMENT :
 * - Les règles du site implémentent SiteRule ; la session les évalue dans
 *   l'ordre jusqu'au point fixe
 * - Pour une dimension (flux ou débit), l'avis vaut :
 *       défautEffectif = max(défaut global, observation moniteur),
 *                        borné par le plafond de la paire
 *       avis = max(1, min(défautEffectif, plafond − réservéParAutrui))
 *   où réservéParAutrui exclut notre propre réservation
 * - Un transfert portant adjusted_streams / adjusted_rate impose ces
 *   valeurs : le grand livre est remplacé tel quel AVANT tout calcul
 *   d'avis, et les propriétés d'ajustement sont consommées ; aucun avis
 *   frais n'est calculé tant que max_streams / max_rate sont présents
 * - L'avis rendu est inscrit au grand livre comme réservation provisoire
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 C'est ici que les plafonds du site deviennent des avis concrets
 * 🎯 Sans plafond pour la paire, l'avis est simplement le défaut effectif
 */

use crate::caps::CapTable;
use crate::entity::{
    Entity, Transfer, ADJUSTED_RATE_PROPERTY, ADJUSTED_STREAMS_PROPERTY, COMPLETED_STATUS,
    MAX_RATE_PROPERTY, MAX_STREAMS_PROPERTY, STATUS_PROPERTY,
};
use crate::ledger::{AllocationError, AllocationLedger, ResourceAllocation};
use crate::monitor::PassiveMonitor;
use crate::registry::ResourceRegistry;
use crate::store::{Fact, FactBase};
use async_trait::async_trait;

/// Variables globales numériques consultées par les règles
pub const DEFAULT_MAX_STREAMS_GLOBAL: &str = "default_max_streams";
pub const DEFAULT_MAX_RATE_GLOBAL: &str = "default_max_rate";

/// Tout ce qu'une règle du site peut voir et toucher pendant une passe
pub struct RuleContext<'a> {
    pub base: &'a mut FactBase,
    pub registry: &'a mut ResourceRegistry,
    pub ledger: &'a dyn AllocationLedger,
    pub stream_caps: &'a CapTable,
    pub rate_caps: &'a CapTable,
    pub monitor: &'a dyn PassiveMonitor,
}

/// Règle de site, évaluée en ordre jusqu'au point fixe.
/// Retourne true si la passe a modifié la base de faits.
#[async_trait]
pub trait SiteRule: Send + Sync {
    fn name(&self) -> &str;
    async fn evaluate(&self, ctx: &mut RuleContext<'_>) -> Result<bool, AllocationError>;
}

/// Règle d'admission du service : pose les avis et tient le grand livre
#[derive(Debug, Default)]
pub struct AdmissionRule;

impl AdmissionRule {
    fn needs_attention(transfer: &Transfer) -> bool {
        if transfer.property(STATUS_PROPERTY) == Some(COMPLETED_STATUS) {
            return false;
        }
        transfer.property(MAX_STREAMS_PROPERTY).is_none()
            || transfer.property(MAX_RATE_PROPERTY).is_none()
            || transfer.property(ADJUSTED_STREAMS_PROPERTY).is_some()
            || transfer.property(ADJUSTED_RATE_PROPERTY).is_some()
    }

    /// Avis pour une dimension : max(1, min(défautEffectif, plafond − autrui))
    fn advise(default: f64, observed: Option<f64>, cap: Option<f64>, others: f64) -> f64 {
        let mut effective = default.max(observed.unwrap_or(f64::MIN));
        if let Some(cap) = cap {
            effective = effective.min(cap);
            effective.min(cap - others).max(1.0)
        } else {
            effective.max(1.0)
        }
    }
}

#[async_trait]
impl SiteRule for AdmissionRule {
    fn name(&self) -> &str {
        "admission"
    }

    async fn evaluate(&self, ctx: &mut RuleContext<'_>) -> Result<bool, AllocationError> {
        let mut transfers = ctx.base.transfers();
        transfers.sort();
        let mut changed = false;

        for mut transfer in transfers {
            if !Self::needs_attention(&transfer) {
                continue;
            }
            let (Some(source), Some(destination)) =
                (transfer.source_host(), transfer.destination_host())
            else {
                // Paire d'hôtes indéterminable : rien à arbitrer
                continue;
            };
            let Some(id) = transfer.id().map(|s| s.to_string()) else {
                continue;
            };

            let adjusted_streams = transfer
                .property(ADJUSTED_STREAMS_PROPERTY)
                .and_then(|v| v.parse::<i64>().ok());
            let adjusted_rate = transfer
                .property(ADJUSTED_RATE_PROPERTY)
                .and_then(|v| v.parse::<f64>().ok());

            // 1. Ajustement rapporté : réservation remplacée telle quelle,
            //    AVANT tout calcul d'avis. Les propriétés sont consommées.
            if adjusted_streams.is_some() || adjusted_rate.is_some() {
                let own = ctx.ledger.get(&id).await?;
                let (own_streams, own_rate) = own
                    .map(|a| (a.streams, a.rate))
                    .unwrap_or((0, 0.0));
                ctx.ledger
                    .upsert(&ResourceAllocation::new(
                        &id,
                        &source,
                        &destination,
                        adjusted_streams.unwrap_or(own_streams),
                        adjusted_rate.unwrap_or(own_rate),
                    ))
                    .await?;
                transfer.properties_mut().remove(ADJUSTED_STREAMS_PROPERTY);
                transfer.properties_mut().remove(ADJUSTED_RATE_PROPERTY);
                ctx.base.update(&id, Fact::Transfer(transfer.clone()));
                changed = true;
            }

            // 2. Avis frais pour les dimensions sans propriété max_*
            let need_streams = transfer.property(MAX_STREAMS_PROPERTY).is_none();
            let need_rate = transfer.property(MAX_RATE_PROPERTY).is_none();
            if !need_streams && !need_rate {
                continue;
            }

            // Notre propre réservation ne compte pas contre nous
            let own = ctx.ledger.get(&id).await?;
            let (own_streams, own_rate) = own.map(|a| (a.streams, a.rate)).unwrap_or((0, 0.0));
            let others_streams = (ctx.ledger.total_streams(&source, &destination).await?
                - own_streams) as f64;
            let others_rate = ctx.ledger.total_rate(&source, &destination).await? - own_rate;

            let default_streams = ctx
                .base
                .get_global(DEFAULT_MAX_STREAMS_GLOBAL)
                .unwrap_or(1.0);
            let default_rate = ctx
                .base
                .get_global(DEFAULT_MAX_RATE_GLOBAL)
                .unwrap_or(1.0);

            let streams = if need_streams {
                Self::advise(
                    default_streams,
                    ctx.monitor
                        .observed_streams(&source, &destination)
                        .map(|v| v as f64),
                    ctx.stream_caps.lookup(&source, &destination),
                    others_streams,
                )
                .floor() as i64
            } else {
                own_streams
            };
            let rate = if need_rate {
                Self::advise(
                    default_rate,
                    ctx.monitor.observed_rate(&source, &destination),
                    ctx.rate_caps.lookup(&source, &destination),
                    others_rate,
                )
            } else {
                own_rate
            };

            if need_streams {
                transfer.set_property(MAX_STREAMS_PROPERTY, &streams.to_string());
            }
            if need_rate {
                transfer.set_property(MAX_RATE_PROPERTY, &format_rate(rate));
            }

            // Réservation provisoire inscrite avant de rendre l'avis
            ctx.ledger
                .upsert(&ResourceAllocation::new(
                    &id,
                    &source,
                    &destination,
                    streams,
                    rate,
                ))
                .await?;
            ctx.base.update(&id, Fact::Transfer(transfer));
            changed = true;
        }
        Ok(changed)
    }
}

/// Débit sans décimales inutiles : 100 plutôt que 100.0, mais 62.5 intact
fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as i64)
    } else {
        format!("{rate}")
    }
}
