//! Regressors of the group level design matrices.
//!
//! One-sample designs (a single group) get a column of ones. The two-sample design comparing
//! the groups gets one 0/1 indicator column per group plus a group label per row, used as
//! exchangeability blocks by the permutation test.

use log::warn;
use ndarray::Array2;

use std::fmt;
use std::str::FromStr;

use crate::error::{NarpsError, Result};
use crate::participants::{Group, GroupAssignment};


/// Statistical design of a group level model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesignMethod {
    EqualRange,
    EqualIndifference,
    GroupComp,
}

/// All design methods, in the order group level workflows are built.
pub const DESIGN_METHODS: [DesignMethod; 3] = [
    DesignMethod::EqualRange,
    DesignMethod::EqualIndifference,
    DesignMethod::GroupComp,
];

impl DesignMethod {
    pub fn name(&self) -> &'static str {
        match self {
            DesignMethod::EqualRange => "equalRange",
            DesignMethod::EqualIndifference => "equalIndifference",
            DesignMethod::GroupComp => "groupComp",
        }
    }

    /// The group a one-sample design is computed on. `None` for the group comparison.
    pub fn group(&self) -> Option<Group> {
        match self {
            DesignMethod::EqualRange => Some(Group::EqualRange),
            DesignMethod::EqualIndifference => Some(Group::EqualIndifference),
            DesignMethod::GroupComp => None,
        }
    }

    pub fn is_one_sample(&self) -> bool {
        self.group().is_some()
    }
}

impl FromStr for DesignMethod {
    type Err = NarpsError;

    fn from_str(s: &str) -> Result<DesignMethod> {
        match s {
            "equalRange" => Ok(DesignMethod::EqualRange),
            "equalIndifference" => Ok(DesignMethod::EqualIndifference),
            "groupComp" => Ok(DesignMethod::GroupComp),
            other => Err(NarpsError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for DesignMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}


/// Named regressor columns for a group level model.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressorSet {
    OneSample {
        group_mean: Vec<f64>,
    },
    TwoSample {
        equal_range: Vec<f64>,
        equal_indifference: Vec<f64>,
        /// 1 for equalRange rows, 2 for equalIndifference rows.
        groups: Vec<u32>,
    },
}

impl RegressorSet {

    /// Number of rows of the design.
    pub fn len(&self) -> usize {
        match self {
            RegressorSet::OneSample { group_mean } => group_mean.len(),
            RegressorSet::TwoSample { equal_range, .. } => equal_range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Regressor names and values, in design matrix column order.
    pub fn columns(&self) -> Vec<(&'static str, &[f64])> {
        match self {
            RegressorSet::OneSample { group_mean } => vec![("group_mean", group_mean.as_slice())],
            RegressorSet::TwoSample { equal_range, equal_indifference, .. } => vec![
                ("equalRange", equal_range.as_slice()),
                ("equalIndifference", equal_indifference.as_slice()),
            ],
        }
    }

    /// Group labels of a two-sample design, `None` for one-sample designs.
    pub fn groups(&self) -> Option<&[u32]> {
        match self {
            RegressorSet::OneSample { .. } => None,
            RegressorSet::TwoSample { groups, .. } => Some(groups.as_slice()),
        }
    }

    /// The design matrix, one row per input file and one column per regressor.
    pub fn design_matrix(&self) -> Array2<f64> {
        let columns = self.columns();
        Array2::from_shape_fn((self.len(), columns.len()), |(row, col)| columns[col].1[row])
    }
}


/// Build the regressors of a group level model.
///
/// With `runs`, every subject contributes one row per run, runs nested inside subjects.
/// For [`DesignMethod::GroupComp`] the rows follow `subjects` order; a subject in neither
/// group keeps the equalRange slot.
pub fn build_regressors(
    assignment: &GroupAssignment,
    method: DesignMethod,
    subjects: &[String],
    runs: Option<&[String]>,
) -> RegressorSet {
    let repeat = runs.map(|r| r.len()).unwrap_or(1);

    match method.group() {
        Some(group) => RegressorSet::OneSample {
            group_mean: vec![1.0; assignment.ids(group).len() * repeat],
        },
        None => {
            let rows = subjects.len() * repeat;
            let mut equal_range = vec![1.0; rows];
            let mut equal_indifference = vec![0.0; rows];
            let mut groups = vec![1; rows];

            for (index, subject_id) in subjects.iter().enumerate() {
                match assignment.group_of(subject_id) {
                    Some(Group::EqualIndifference) => {
                        for row in index * repeat..(index + 1) * repeat {
                            equal_range[row] = 0.0;
                            equal_indifference[row] = 1.0;
                            groups[row] = 2;
                        }
                    }
                    Some(Group::EqualRange) => {}
                    None => warn!("Subject {} is in neither group, modelled as equalRange", subject_id),
                }
            }

            RegressorSet::TwoSample {
                equal_range,
                equal_indifference,
                groups,
            }
        }
    }
}


/// Same as [`build_regressors`], with the method given by name.
pub fn build_regressors_by_name(
    assignment: &GroupAssignment,
    method: &str,
    subjects: &[String],
    runs: Option<&[String]>,
) -> Result<RegressorSet> {
    Ok(build_regressors(assignment, method.parse()?, subjects, runs))
}
