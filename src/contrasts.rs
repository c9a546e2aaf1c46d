//! Contrasts of the run level and group level models.
//!
//! A contrast is `(name, statistic, conditions, weights)`. Order matters: external tools index
//! contrasts by position, so catalogs are returned exactly as declared.

use serde::Serialize;

use crate::error::{NarpsError, Result};
use crate::regressors::DesignMethod;


/// Statistic computed for a contrast. Only t contrasts are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatKind {
    T,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contrast {
    pub name: String,
    pub stat: StatKind,
    pub conditions: Vec<String>,
    pub weights: Vec<f64>,
}

impl Contrast {

    /// Create a t contrast. Fails if `conditions` and `weights` differ in length.
    pub fn new(name: &str, conditions: &[&str], weights: &[f64]) -> Result<Contrast> {
        if conditions.len() != weights.len() {
            return Err(NarpsError::InvalidContrast(
                name.to_string(),
                conditions.len(),
                weights.len(),
            ));
        }
        Ok(Contrast {
            name: name.to_string(),
            stat: StatKind::T,
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            weights: weights.to_vec(),
        })
    }
}


/// A contrast declared in a static table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastSpec {
    pub name: &'static str,
    pub conditions: &'static [&'static str],
    pub weights: &'static [f64],
}

impl ContrastSpec {
    pub fn to_contrast(&self) -> Result<Contrast> {
        Contrast::new(self.name, self.conditions, self.weights)
    }
}


/// Turn a static table into contrasts, keeping declaration order.
pub fn contrasts_from_specs(specs: &[ContrastSpec]) -> Result<Vec<Contrast>> {
    specs.iter().map(|s| s.to_contrast()).collect()
}


/// Group level contrasts of a design method.
///
/// One-sample designs test the group mean in both directions; the two-sample design tests
/// equalRange against equalIndifference.
pub fn group_level_contrasts(method: DesignMethod) -> Vec<Contrast> {
    match method {
        DesignMethod::EqualRange | DesignMethod::EqualIndifference => vec![
            Contrast {
                name: String::from("group_mean"),
                stat: StatKind::T,
                conditions: vec![String::from("group_mean")],
                weights: vec![1.0],
            },
            Contrast {
                name: String::from("group_mean_neg"),
                stat: StatKind::T,
                conditions: vec![String::from("group_mean")],
                weights: vec![-1.0],
            },
        ],
        DesignMethod::GroupComp => vec![Contrast {
            name: String::from("equal_range_vs_equal_indifference"),
            stat: StatKind::T,
            conditions: vec![String::from("equalRange"), String::from("equalIndifference")],
            weights: vec![1.0, -1.0],
        }],
    }
}
