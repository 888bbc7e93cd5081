//! Cost accounting: pricing, pure cost math, and the usage ledger.

mod calculator;
mod ledger;
mod schema;
mod types;

pub use calculator::{
    CostCalculator, MonthlyCostEstimate, SavingsBreakdown, WorkloadAssumptions,
};
pub use ledger::{CostLedger, SqliteCostLedger};
pub use schema::{get_schema_version, has_index, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use types::{CostPeriod, CostSummary, ModelPricing, ModelUsage, PricingTable};
