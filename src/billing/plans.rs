use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

/// key: billing-plan -> credit allotment per period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPlan {
    pub code: String,
    pub monthly_credits: i64,
    pub yearly_credits: i64,
}

impl PricingPlan {
    pub fn credits_for(&self, period: BillingPeriod) -> i64 {
        match period {
            BillingPeriod::Monthly => self.monthly_credits,
            BillingPeriod::Yearly => self.yearly_credits,
        }
    }
}

/// One purchasable product: a plan sold on a given period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProduct {
    pub product_id: String,
    pub plan: String,
    pub period: BillingPeriod,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanCatalogDocument {
    plans: Vec<PricingPlan>,
    products: Vec<PlanProduct>,
}

#[derive(Debug, Error)]
pub enum PlanCatalogError {
    #[error("plan catalog is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("product `{product_id}` references unknown plan `{plan}`")]
    UnknownPlan { product_id: String, plan: String },
    #[error("plan `{0}` has a negative credit allotment")]
    NegativeAllotment(String),
}

/// What a paid product entitles the subscriber to for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub plan: String,
    pub period: BillingPeriod,
    pub credits: i64,
}

/// key: plan-catalog -> provider product id to plan + period
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: HashMap<String, PricingPlan>,
    products: HashMap<String, PlanProduct>,
}

impl PlanCatalog {
    pub fn new(
        plans: Vec<PricingPlan>,
        products: Vec<PlanProduct>,
    ) -> Result<Self, PlanCatalogError> {
        let mut by_code = HashMap::with_capacity(plans.len());
        for plan in plans {
            if plan.monthly_credits < 0 || plan.yearly_credits < 0 {
                return Err(PlanCatalogError::NegativeAllotment(plan.code));
            }
            by_code.insert(plan.code.clone(), plan);
        }

        let mut by_product = HashMap::with_capacity(products.len());
        for product in products {
            if !by_code.contains_key(&product.plan) {
                return Err(PlanCatalogError::UnknownPlan {
                    product_id: product.product_id,
                    plan: product.plan,
                });
            }
            by_product.insert(product.product_id.clone(), product);
        }

        Ok(Self {
            plans: by_code,
            products: by_product,
        })
    }

    /// Parses `{ "plans": [...], "products": [...] }`.
    pub fn from_json(raw: &str) -> Result<Self, PlanCatalogError> {
        let document: PlanCatalogDocument = serde_json::from_str(raw)?;
        Self::new(document.plans, document.products)
    }

    pub fn standard() -> Self {
        let plans = vec![
            plan("starter", 200, 2_400),
            plan("pro", 400, 4_800),
            plan("studio", 1_200, 14_400),
        ];
        let products = ["starter", "pro", "studio"]
            .into_iter()
            .flat_map(|code| {
                [
                    product(&format!("prod_{code}_monthly"), code, BillingPeriod::Monthly),
                    product(&format!("prod_{code}_yearly"), code, BillingPeriod::Yearly),
                ]
            })
            .collect();
        Self::new(plans, products).expect("standard plan catalog is well formed")
    }

    pub fn entitlement(&self, product_id: &str) -> Option<Entitlement> {
        let product = self.products.get(product_id)?;
        let plan = self.plans.get(&product.plan)?;
        Some(Entitlement {
            plan: plan.code.clone(),
            period: product.period,
            credits: plan.credits_for(product.period),
        })
    }

    pub fn plans(&self) -> impl Iterator<Item = &PricingPlan> {
        self.plans.values()
    }
}

fn plan(code: &str, monthly_credits: i64, yearly_credits: i64) -> PricingPlan {
    PricingPlan {
        code: code.to_string(),
        monthly_credits,
        yearly_credits,
    }
}

fn product(product_id: &str, plan: &str, period: BillingPeriod) -> PlanProduct {
    PlanProduct {
        product_id: product_id.to_string(),
        plan: plan.to_string(),
        period,
    }
}
