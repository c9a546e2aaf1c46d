use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum NarpsError {
        /// A row of an event file does not have enough columns.
        MalformedEventRow(line: u64, expected: usize, found: usize) {
            display("Malformed event row at line {}: expected {} columns, found {}", line, expected, found)
        }

        MalformedParticipantRow(line: u64, found: usize) {
            display("Malformed participants row at line {}: expected a participant id and a group, found {} columns", line, found)
        }

        /// A field that should hold a number could not be parsed.
        InvalidNumber(line: u64, value: String) {
            display("Invalid numeric value '{}' at line {}", value, line)
        }

        /// The group level design method is not one of equalRange, equalIndifference or groupComp.
        UnsupportedMethod(method: String) {
            display("Unsupported design method '{}'", method)
        }

        UnknownTeam(team_id: String) {
            display("No pipeline implemented for team '{}'", team_id)
        }

        /// Condition names and weights of a contrast differ in length.
        InvalidContrast(name: String, conditions: usize, weights: usize) {
            display("Invalid contrast '{}': {} conditions but {} weights", name, conditions, weights)
        }

        DuplicateNode(name: String) {
            display("Workflow already contains a node named '{}'", name)
        }

        UnknownNode(name: String) {
            display("Workflow has no node named '{}'", name)
        }

        InputAlreadyConnected(node: String, port: String) {
            display("Input '{}' of node '{}' is already connected", port, node)
        }

        CyclicWorkflow(name: String) {
            display("Workflow '{}' contains a cycle", name)
        }

        /// Invalid NIfTI file: wrong header size or magic string.
        InvalidNiftiFormat {
            display("Invalid NIfTI-1 file")
        }

        UnsupportedNiftiDatatype(code: i16) {
            display("Unsupported NIfTI datatype code {}", code)
        }

        ShapeMismatch(left: Vec<usize>, right: Vec<usize>) {
            display("Volume shapes differ: {:?} vs {:?}", left, right)
        }

        /// Too few usable voxels, or no variance in one of the maps.
        DegenerateCorrelation(voxels: usize) {
            display("Correlation undefined over {} usable voxels", voxels)
        }

        MissingFirstLevelOutputs(files: Vec<PathBuf>) {
            display("There are {} missing files for first level analysis", files.len())
        }

        HypothesisCount(expected: usize, found: usize) {
            display("Expected {} hypothesis files, found {}", expected, found)
        }

        EngineFailed(command: String, code: Option<i32>) {
            display("Workflow engine '{}' failed with exit code {:?}", command, code)
        }

        NoCollection(team_id: String) {
            display("No reference collection configured for team '{}'", team_id)
        }

        /// Raised when the workflow engine command is empty.
        NoEngineCommand {
            display("No workflow engine command configured")
        }

        Json(err: serde_json::Error) {
            from()
            source(err)
            display("JSON error: {}", err)
        }

        Http(err: reqwest::Error) {
            from()
            source(err)
            display("HTTP error: {}", err)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, NarpsError>;
