//! Workflows: directed acyclic graphs of external tool invocations.
//!
//! A [`Node`] names an interface of an external toolkit (e.g. `fsl.BET`) and its fixed inputs.
//! A [`Connection`] feeds a named output of one node into a named input of another, so data
//! dependencies between steps are explicit instead of implied by file name templates.
//! Workflows are executed by an external engine, which receives them as JSON.

use serde::Serialize;
use serde_json::Value;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NarpsError, Result};


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub name: String,
    pub interface: String,
    pub inputs: BTreeMap<String, Value>,
    /// Input fields the engine iterates over, with their values.
    pub iterables: Vec<(String, Vec<String>)>,
}

impl Node {
    pub fn new(name: &str, interface: &str) -> Node {
        Node {
            name: name.to_string(),
            interface: interface.to_string(),
            inputs: BTreeMap::new(),
            iterables: Vec::new(),
        }
    }

    /// Set a fixed input value.
    pub fn input<V: Into<Value>>(mut self, key: &str, value: V) -> Node {
        self.inputs.insert(key.to_string(), value.into());
        self
    }

    pub fn iterable(mut self, field: &str, values: &[String]) -> Node {
        self.iterables.push((field.to_string(), values.to_vec()));
        self
    }
}


/// A named output or input of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub node: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub source: Artifact,
    pub destination: Artifact,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub name: String,
    pub base_dir: PathBuf,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
}

impl Workflow {
    pub fn new<P: AsRef<Path>>(name: &str, base_dir: P) -> Workflow {
        Workflow {
            name: name.to_string(),
            base_dir: base_dir.as_ref().to_path_buf(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.node(&node.name).is_some() {
            return Err(NarpsError::DuplicateNode(node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_nodes<I: IntoIterator<Item = Node>>(&mut self, nodes: I) -> Result<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Feed output `source_port` of `source` into input `destination_port` of `destination`.
    ///
    /// Both nodes must exist, an input is fed at most once, and the graph must stay acyclic.
    pub fn connect(&mut self, source: &str, source_port: &str, destination: &str, destination_port: &str) -> Result<()> {
        for name in &[source, destination] {
            if self.node(name).is_none() {
                return Err(NarpsError::UnknownNode(name.to_string()));
            }
        }
        let already_fed = self
            .connections
            .iter()
            .any(|c| c.destination.node == destination && c.destination.port == destination_port);
        if already_fed {
            return Err(NarpsError::InputAlreadyConnected(destination.to_string(), destination_port.to_string()));
        }

        self.connections.push(Connection {
            source: Artifact { node: source.to_string(), port: source_port.to_string() },
            destination: Artifact { node: destination.to_string(), port: destination_port.to_string() },
        });
        let acyclic = self.topological_order().is_ok();
        if !acyclic {
            self.connections.pop();
            return Err(NarpsError::CyclicWorkflow(self.name.clone()));
        }
        Ok(())
    }

    /// Connect several `(output, input)` port pairs between the same two nodes.
    pub fn connect_ports(&mut self, source: &str, destination: &str, ports: &[(&str, &str)]) -> Result<()> {
        for (source_port, destination_port) in ports {
            self.connect(source, source_port, destination, destination_port)?;
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections feeding the inputs of `node`.
    pub fn incoming(&self, node: &str) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.destination.node == node).collect()
    }

    /// Node names in an order where every node comes after the nodes it depends on.
    /// Ties keep insertion order.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.incoming(&n.name).iter().map(|c| &c.source.node).collect::<BTreeSet<_>>().len())
            .collect();
        let mut done = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            let next = (0..self.nodes.len()).find(|&i| !done[i] && pending[i] == 0);
            let idx = match next {
                Some(idx) => idx,
                None => return Err(NarpsError::CyclicWorkflow(self.name.clone())),
            };
            done[idx] = true;
            let name = self.nodes[idx].name.as_str();
            order.push(name);

            let downstream: BTreeSet<&str> = self
                .connections
                .iter()
                .filter(|c| c.source.node == name)
                .map(|c| c.destination.node.as_str())
                .collect();
            for (i, node) in self.nodes.iter().enumerate() {
                if downstream.contains(node.name.as_str()) {
                    pending[i] -= 1;
                }
            }
        }
        Ok(order)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the workflow as JSON to `<dir>/<name>.json` and return that path.
    pub fn write_json<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(format!("{}.json", self.name));
        fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn chain() -> Workflow {
        let mut wf = Workflow::new("chain", "/tmp/work");
        wf.add_nodes(vec![
            Node::new("smooth", "fsl.SUSAN").input("fwhm", 6.0),
            Node::new("select", "io.SelectFiles"),
            Node::new("sink", "io.DataSink"),
        ]).unwrap();
        wf.connect("select", "func", "smooth", "in_file").unwrap();
        wf.connect("smooth", "smoothed_file", "sink", "preprocessing.@smoothed").unwrap();
        wf
    }

    #[test]
    fn nodes_come_after_their_dependencies() {
        let wf = chain();
        assert_eq!(vec!["select", "smooth", "sink"], wf.topological_order().unwrap());
    }

    #[test]
    fn duplicate_and_unknown_nodes_are_rejected() {
        let mut wf = chain();
        assert!(matches!(wf.add_node(Node::new("sink", "io.DataSink")), Err(NarpsError::DuplicateNode(_))));
        assert!(matches!(wf.connect("select", "anat", "bet", "in_file"), Err(NarpsError::UnknownNode(_))));
    }

    #[test]
    fn an_input_is_fed_once() {
        let mut wf = chain();
        assert!(matches!(
            wf.connect("select", "anat", "smooth", "in_file"),
            Err(NarpsError::InputAlreadyConnected(_, _))
        ));
    }

    #[test]
    fn cycles_are_rejected_and_rolled_back() {
        let mut wf = chain();
        assert!(matches!(
            wf.connect("sink", "out_file", "select", "base_directory"),
            Err(NarpsError::CyclicWorkflow(_))
        ));
        assert_eq!(2, wf.connections().len());
        assert!(wf.topological_order().is_ok());
    }

    #[test]
    fn workflow_serialises_with_inputs() {
        let json = chain().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!("chain", value["name"]);
        assert_eq!(6.0, value["nodes"][0]["inputs"]["fwhm"]);
        assert_eq!("smooth", value["connections"][0]["destination"]["node"]);
    }
}
