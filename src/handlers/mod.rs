use std::sync::Arc;

use crate::{
    auth::OAuthClient,
    config::Config,
    database::Database,
    models::PlanCatalog,
    services::{converter::ConversionGateway, quota::QuotaLedger},
};

pub mod auth;
pub mod download;
pub mod files;
pub mod health;
pub mod user;

#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Config,
    pub catalog: Arc<PlanCatalog>,
    pub ledger: QuotaLedger,
    pub gateway: Arc<ConversionGateway>,
    pub oauth: Arc<OAuthClient>,
}
