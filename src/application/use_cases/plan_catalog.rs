use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::validators::is_valid_plan_name,
    domain::entities::plan::{FeatureSet, FeatureValue, NewPlan, Plan},
};

#[async_trait]
pub trait PlanRepo: Send + Sync {
    /// Active plans, cheapest first, ties broken by name.
    async fn list_active(&self) -> AppResult<Vec<Plan>>;
    async fn list_all(&self) -> AppResult<Vec<Plan>>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>>;
    /// Insert keyed by name. An existing plan keeps its terms; only the provider price
    /// binding is refreshed.
    async fn upsert_by_name(&self, plan: &NewPlan) -> AppResult<Plan>;
    async fn set_active(&self, id: Uuid, active: bool) -> AppResult<Option<Plan>>;
}

pub struct PlanCatalogUseCases {
    repo: Arc<dyn PlanRepo>,
}

impl PlanCatalogUseCases {
    pub fn new(repo: Arc<dyn PlanRepo>) -> Self {
        Self { repo }
    }

    pub async fn list_plans(&self) -> AppResult<Vec<Plan>> {
        self.repo.list_active().await
    }

    pub async fn list_all_plans(&self) -> AppResult<Vec<Plan>> {
        self.repo.list_all().await
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> AppResult<Plan> {
        self.repo.get_by_id(plan_id).await?.ok_or(AppError::NotFound)
    }

    /// Plan that can still be purchased.
    pub async fn get_purchasable_plan(&self, plan_id: Uuid) -> AppResult<Plan> {
        let plan = self.get_plan(plan_id).await?;
        if !plan.is_active {
            return Err(AppError::InvalidInput("Plan is no longer available".into()));
        }
        Ok(plan)
    }

    #[instrument(skip(self, plans), fields(count = plans.len()))]
    pub async fn seed_plans(&self, plans: &[NewPlan]) -> AppResult<Vec<Plan>> {
        for plan in plans {
            validate_new_plan(plan)?;
        }

        let mut seeded = Vec::with_capacity(plans.len());
        for plan in plans {
            seeded.push(self.repo.upsert_by_name(plan).await?);
        }
        info!(count = seeded.len(), "Plan catalog seeded");
        Ok(seeded)
    }

    #[instrument(skip(self))]
    pub async fn set_plan_active(&self, plan_id: Uuid, active: bool) -> AppResult<Plan> {
        let plan = self
            .repo
            .set_active(plan_id, active)
            .await?
            .ok_or(AppError::NotFound)?;
        info!(plan = %plan.name, active, "Plan availability changed");
        Ok(plan)
    }
}

fn validate_new_plan(plan: &NewPlan) -> AppResult<()> {
    if !is_valid_plan_name(&plan.name) {
        return Err(AppError::InvalidInput(format!(
            "Invalid plan name '{}'",
            plan.name
        )));
    }
    if plan.duration_days <= 0 {
        return Err(AppError::InvalidInput(format!(
            "Plan '{}' must have a positive duration",
            plan.name
        )));
    }
    if plan.price_minor_units < 0 || plan.trial_days < 0 {
        return Err(AppError::InvalidInput(format!(
            "Plan '{}' has a negative price or trial window",
            plan.name
        )));
    }
    if plan.is_recurring && plan.provider_price_id.is_none() {
        return Err(AppError::InvalidInput(format!(
            "Recurring plan '{}' needs a provider price id",
            plan.name
        )));
    }
    if plan.is_recurring && plan.trial_days > 0 {
        return Err(AppError::InvalidInput(format!(
            "Plan '{}' cannot be both a trial and recurring",
            plan.name
        )));
    }
    Ok(())
}

fn features(entries: &[(&str, FeatureValue)]) -> FeatureSet {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Built-in catalog. The recurring plan is only offered when a Stripe price is configured.
pub fn default_catalog(stripe_pro_monthly_price_id: Option<String>) -> Vec<NewPlan> {
    use FeatureValue::{Enabled, Limit};

    let fixed_term = |name: &str, display: &str, price: i64, days: i32, projects: i64| NewPlan {
        name: name.to_string(),
        display_name: display.to_string(),
        price_minor_units: price,
        currency: "inr".to_string(),
        duration_days: days,
        trial_days: 0,
        is_recurring: false,
        feature_set: features(&[
            ("max_projects", Limit(projects)),
            ("auto_deploy", Enabled(true)),
            ("priority_support", Enabled(days >= 365)),
        ]),
        provider_price_id: None,
    };

    let mut plans = vec![
        NewPlan {
            name: "free-trial".to_string(),
            display_name: "Free Trial".to_string(),
            price_minor_units: 0,
            currency: "inr".to_string(),
            duration_days: 3,
            trial_days: 3,
            is_recurring: false,
            feature_set: features(&[
                ("max_projects", Limit(1)),
                ("auto_deploy", Enabled(false)),
                ("priority_support", Enabled(false)),
            ]),
            provider_price_id: None,
        },
        fixed_term("monthly", "Monthly", 49_900, 30, 5),
        fixed_term("quarterly", "Quarterly", 129_900, 90, 10),
        fixed_term("yearly", "Yearly", 449_900, 365, 25),
    ];

    if let Some(price_id) = stripe_pro_monthly_price_id {
        plans.push(NewPlan {
            name: "pro-monthly".to_string(),
            display_name: "Pro (auto-renewing)".to_string(),
            price_minor_units: 1_999,
            currency: "usd".to_string(),
            duration_days: 30,
            trial_days: 0,
            is_recurring: true,
            feature_set: features(&[
                ("max_projects", Limit(50)),
                ("auto_deploy", Enabled(true)),
                ("priority_support", Enabled(true)),
            ]),
            provider_price_id: Some(price_id),
        });
    }

    plans
}
