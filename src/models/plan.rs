use serde::Serialize;

use crate::models::MediaKind;

/// A pricing tier. The catalog is immutable after startup; everything that
/// needs plan data receives the catalog through application state.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    #[serde(skip_serializing)]
    pub id: String,
    pub name: String,
    #[serde(rename = "mp3")]
    pub mp3_limit: i64,
    #[serde(rename = "mp4")]
    pub mp4_limit: i64,
    pub price: u32,
    pub max_quality: u32,
    pub qualities: Vec<String>,
}

impl Plan {
    pub fn limit_for(&self, kind: MediaKind) -> i64 {
        match kind {
            MediaKind::Audio => self.mp3_limit,
            MediaKind::Video => self.mp4_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// The five built-in tiers.
    pub fn builtin() -> Self {
        let plan = |id: &str, name: &str, limit: i64, price: u32, max_quality: u32, qualities: &[&str]| Plan {
            id: id.to_string(),
            name: name.to_string(),
            mp3_limit: limit,
            mp4_limit: limit,
            price,
            max_quality,
            qualities: qualities.iter().map(|q| q.to_string()).collect(),
        };

        Self {
            plans: vec![
                plan("free", "Free", 5, 0, 480, &["360", "480"]),
                plan("basic", "Basic", 100, 10, 720, &["480", "720"]),
                plan("gold", "Gold", 300, 25, 720, &["480", "720"]),
                plan("pro", "Pro", 500, 35, 1080, &["480", "720", "1080"]),
                plan("premium", "Premium", 1000, 50, 2160, &["480", "720", "1080", "1440", "2160"]),
            ],
        }
    }

    /// Unknown or missing plan ids fall back to the free tier.
    pub fn plan_for(&self, plan_id: &str) -> &Plan {
        self.plans
            .iter()
            .find(|plan| plan.id == plan_id)
            .unwrap_or_else(|| self.free())
    }

    pub fn free(&self) -> &Plan {
        &self.plans[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_five_tiers() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.plans.len(), 5);
        assert_eq!(catalog.free().id, "free");
    }

    #[test]
    fn test_unknown_plan_falls_back_to_free() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.plan_for("enterprise").id, "free");
        assert_eq!(catalog.plan_for("").id, "free");
    }

    #[test]
    fn test_free_tier_limits() {
        let catalog = PlanCatalog::builtin();
        let free = catalog.plan_for("free");
        assert_eq!(free.limit_for(MediaKind::Audio), 5);
        assert_eq!(free.limit_for(MediaKind::Video), 5);
        assert_eq!(free.max_quality, 480);
    }

    #[test]
    fn test_premium_allows_4k() {
        let catalog = PlanCatalog::builtin();
        let premium = catalog.plan_for("premium");
        assert_eq!(premium.max_quality, 2160);
        assert_eq!(premium.limit_for(MediaKind::Video), 1000);
    }
}
