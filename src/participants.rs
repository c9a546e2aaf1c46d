//! Functions for reading the participants table and splitting subjects into the two NARPS groups.
//!
//! The table is whitespace-delimited (usually tabs) with a header row, then `participant_id, group, ...` per subject.
//! Subject ids are the last three characters of `participant_id` ("sub-001" gives "001").

use log::warn;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{NarpsError, Result};
use crate::util::{parent_subject_id, subject_id_from_path, table_rows, trailing_subject_id};


/// The two experimental groups of the NARPS mixed gambles task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    EqualRange,
    EqualIndifference,
}

impl Group {
    /// Exact match on the labels used in the participants table.
    pub fn from_label(label: &str) -> Option<Group> {
        match label {
            "equalRange" => Some(Group::EqualRange),
            "equalIndifference" => Some(Group::EqualIndifference),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Group::EqualRange => "equalRange",
            Group::EqualIndifference => "equalIndifference",
        }
    }
}


/// One row of the participants table.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub subject_id: String,
    pub group_label: String,
}

impl Participant {
    pub fn group(&self) -> Option<Group> {
        Group::from_label(&self.group_label)
    }
}


/// Read the participants table, in file order. Blank lines are skipped, a row without a
/// group column is an error.
pub fn read_participants<P: AsRef<Path>>(path: P) -> Result<Vec<Participant>> {
    let file = File::open(path)?;
    participants_from_reader(file)
}


pub fn participants_from_reader<S: Read>(input: S) -> Result<Vec<Participant>> {
    table_rows(BufReader::new(input))?
        .into_iter()
        .map(|(line, fields)| match fields.as_slice() {
            [label, group, ..] => Ok(Participant {
                subject_id: trailing_subject_id(label).to_string(),
                group_label: group.to_string(),
            }),
            _ => Err(NarpsError::MalformedParticipantRow(line, fields.len())),
        })
        .collect()
}


/// All subject ids listed in the participants table, in table order.
pub fn list_participants<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    Ok(read_participants(path)?
        .into_iter()
        .map(|p| p.subject_id)
        .collect())
}


/// Subject ids of the requested subjects, split by group. Both lists follow table order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupAssignment {
    pub equal_range: Vec<String>,
    pub equal_indifference: Vec<String>,
}

impl GroupAssignment {

    /// Split `subjects` using the participants table at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P, subjects: &[String]) -> Result<GroupAssignment> {
        let participants = read_participants(path)?;
        Ok(GroupAssignment::from_participants(&participants, subjects))
    }

    /// Subjects missing from the table are dropped with a warning, they are not an error.
    pub fn from_participants(participants: &[Participant], subjects: &[String]) -> GroupAssignment {
        let mut assignment = GroupAssignment::default();
        for participant in participants {
            if !subjects.contains(&participant.subject_id) {
                continue;
            }
            if assignment.group_of(&participant.subject_id).is_some() {
                continue;
            }
            match participant.group() {
                Some(Group::EqualRange) => assignment.equal_range.push(participant.subject_id.clone()),
                Some(Group::EqualIndifference) => assignment.equal_indifference.push(participant.subject_id.clone()),
                None => {}
            }
        }

        for subject in subjects {
            if assignment.group_of(subject).is_none() {
                warn!("Subject {} has no group in the participants table, leaving it out", subject);
            }
        }
        assignment
    }

    pub fn group_of(&self, subject_id: &str) -> Option<Group> {
        if self.equal_range.iter().any(|s| s == subject_id) {
            Some(Group::EqualRange)
        } else if self.equal_indifference.iter().any(|s| s == subject_id) {
            Some(Group::EqualIndifference)
        } else {
            None
        }
    }

    pub fn ids(&self, group: Group) -> &[String] {
        match group {
            Group::EqualRange => &self.equal_range,
            Group::EqualIndifference => &self.equal_indifference,
        }
    }

    /// Put each per-subject file into its subject's group. The subject comes from a
    /// `_subject_id_XXX` or `sub-XXX` path component, or else from the parent directory name.
    ///
    /// Files of requested subjects also go into [`GroupedFiles::all`], whether or not they
    /// have a group. Input order is kept in every bucket.
    pub fn bucket_files<P: AsRef<Path>>(&self, files: &[P], subjects: &[String]) -> GroupedFiles {
        let mut grouped = GroupedFiles::default();
        for file in files {
            let subject_id = match subject_id_from_path(file).or_else(|| parent_subject_id(file)) {
                Some(id) => id,
                None => continue,
            };
            let path = file.as_ref().to_path_buf();
            match self.group_of(&subject_id) {
                Some(Group::EqualIndifference) => grouped.equal_indifference.push(path.clone()),
                Some(Group::EqualRange) => grouped.equal_range.push(path.clone()),
                None => {}
            }
            if subjects.contains(&subject_id) {
                grouped.all.push(path);
            }
        }
        grouped
    }
}


/// Per-subject files split by group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedFiles {
    pub equal_range: Vec<PathBuf>,
    pub equal_indifference: Vec<PathBuf>,
    pub all: Vec<PathBuf>,
}


#[cfg(test)]
mod test {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    const TABLE: &str = "participant_id\tgroup\tgender\tage\n\
        sub-001\tequalIndifference\tM\t24\n\
        sub-002\tequalRange\tM\t25\n\
        sub-003\tequalIndifference\tF\t27\n\
        sub-004\tequalRange\tM\t25\n\
        sub-005\tequalrange\tF\t22\n";

    #[test]
    fn groups_match_labels_exactly() {
        assert_eq!(Some(Group::EqualRange), Group::from_label("equalRange"));
        assert_eq!(None, Group::from_label("equalrange"));
        assert_eq!("equalIndifference", Group::EqualIndifference.label());
    }

    #[test]
    fn subjects_are_split_in_table_order() {
        let participants = participants_from_reader(TABLE.as_bytes()).unwrap();
        let assignment = GroupAssignment::from_participants(&participants, &ids(&["004", "001", "002"]));
        assert_eq!(ids(&["002", "004"]), assignment.equal_range);
        assert_eq!(ids(&["001"]), assignment.equal_indifference);
    }

    #[test]
    fn unknown_subjects_and_labels_are_dropped() {
        let participants = participants_from_reader(TABLE.as_bytes()).unwrap();
        let assignment = GroupAssignment::from_participants(&participants, &ids(&["003", "005", "999"]));
        assert_eq!(ids(&["003"]), assignment.equal_indifference);
        assert!(assignment.equal_range.is_empty());
        assert_eq!(None, assignment.group_of("005"));
    }

    #[test]
    fn space_separated_tables_are_read() {
        let table = "participant_id group gender age\n\
            sub-001 equalRange M 24\n\
            \n\
            sub-002  equalIndifference\tF 25\n";
        let participants = participants_from_reader(table.as_bytes()).unwrap();
        let assignment = GroupAssignment::from_participants(&participants, &ids(&["001", "002"]));
        assert_eq!(ids(&["001"]), assignment.equal_range);
        assert_eq!(ids(&["002"]), assignment.equal_indifference);
    }

    #[test]
    fn rows_without_a_group_are_rejected() {
        let table = "participant_id\tgroup\nsub-001\tequalRange\nsub-002\n";
        assert!(matches!(
            participants_from_reader(table.as_bytes()),
            Err(NarpsError::MalformedParticipantRow(3, 1))
        ));
    }

    #[test]
    fn files_are_bucketed_by_subject_component() {
        let participants = participants_from_reader(TABLE.as_bytes()).unwrap();
        let subjects = ids(&["001", "002"]);
        let assignment = GroupAssignment::from_participants(&participants, &subjects);
        let files = vec![
            PathBuf::from("/l1/_run_id_01_subject_id_001/results/cope1.nii.gz"),
            PathBuf::from("/l2/_contrast_id_1_subject_id_002/cope1.nii.gz"),
            PathBuf::from("/l1/_run_id_01_subject_id_003/results/cope1.nii.gz"),
        ];
        let grouped = assignment.bucket_files(&files, &subjects);
        assert_eq!(vec![files[0].clone()], grouped.equal_indifference);
        assert_eq!(vec![files[1].clone()], grouped.equal_range);
        assert_eq!(files[..2].to_vec(), grouped.all);
    }
}
