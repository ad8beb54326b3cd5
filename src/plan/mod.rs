//! Query plans: ordered steps authored by the reasoning service.
//!
//! A plan is data, not code. Each step's `query_type` and
//! `expected_output_type` are parsed into closed enums up front, so the
//! executor and the result processors dispatch through fixed tables instead of
//! trusting free-form text.

pub mod planner;

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use planner::{PlanOutcome, QueryPlanner};

/// How a step's query should be executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Declarative pattern query in the managed backend's language (SPARQL).
    PatternQuery,
    /// Native traversal intent interpreted over nodes and relationships.
    NativeTraversal,
    /// Let the active backend decide.
    Hybrid,
    /// Anything else the reasoning service wrote; treated like `Hybrid`.
    Unrecognized(String),
}

impl QueryType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace('_', "-").as_str() {
            "pattern-query" | "pattern" | "sparql" | "cypher" | "neo4j" => QueryType::PatternQuery,
            "native-traversal" | "traversal" | "petgraph" | "networkx" | "memory" | "in-memory" => {
                QueryType::NativeTraversal
            }
            "hybrid" => QueryType::Hybrid,
            _ => QueryType::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryType::PatternQuery => "pattern-query",
            QueryType::NativeTraversal => "native-traversal",
            QueryType::Hybrid => "hybrid",
            QueryType::Unrecognized(raw) => raw,
        }
    }
}

/// What shape the step's result should be processed into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputType {
    EntityList,
    RelationshipAnalysis,
    CoauthorshipNetwork,
    Aggregation,
    PatternDiscovery,
    TextExtraction,
    /// Unknown output types pass raw rows through.
    Unrecognized(String),
}

impl OutputType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "entity_list" => OutputType::EntityList,
            "relationship_analysis" => OutputType::RelationshipAnalysis,
            "coauthorship_network" => OutputType::CoauthorshipNetwork,
            "aggregation" => OutputType::Aggregation,
            "pattern_discovery" => OutputType::PatternDiscovery,
            "text_extraction" => OutputType::TextExtraction,
            _ => OutputType::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OutputType::EntityList => "entity_list",
            OutputType::RelationshipAnalysis => "relationship_analysis",
            OutputType::CoauthorshipNetwork => "coauthorship_network",
            OutputType::Aggregation => "aggregation",
            OutputType::PatternDiscovery => "pattern_discovery",
            OutputType::TextExtraction => "text_extraction",
            OutputType::Unrecognized(raw) => raw,
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Ok(<$ty>::parse(&raw))
            }
        }
    };
}

string_serde!(QueryType);
string_serde!(OutputType);

/// One unit of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStep {
    pub step_number: u32,
    pub description: String,
    pub query_type: QueryType,
    pub query: String,
    pub expected_output_type: OutputType,
    /// Advisory: steps whose results this one builds on.
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

/// Why a step list cannot be used as a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDefect {
    ZeroStepNumber,
    DuplicateStepNumber(u32),
}

impl std::fmt::Display for PlanDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanDefect::ZeroStepNumber => write!(f, "step numbers must be positive"),
            PlanDefect::DuplicateStepNumber(n) => write!(f, "step number {n} appears more than once"),
        }
    }
}

/// Check that step numbers are positive and unique. `depends_on` is not
/// checked; dependencies are advisory. An empty plan is valid.
pub fn check_steps(steps: &[QueryStep]) -> Result<(), PlanDefect> {
    let mut seen = HashSet::with_capacity(steps.len());
    for step in steps {
        if step.step_number == 0 {
            return Err(PlanDefect::ZeroStepNumber);
        }
        if !seen.insert(step.step_number) {
            return Err(PlanDefect::DuplicateStepNumber(step.step_number));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_aliases() {
        assert_eq!(QueryType::parse("SPARQL"), QueryType::PatternQuery);
        assert_eq!(QueryType::parse("pattern_query"), QueryType::PatternQuery);
        assert_eq!(QueryType::parse("networkx"), QueryType::NativeTraversal);
        assert_eq!(QueryType::parse(" native-traversal "), QueryType::NativeTraversal);
        assert_eq!(QueryType::parse("hybrid"), QueryType::Hybrid);
        assert_eq!(
            QueryType::parse("gremlin"),
            QueryType::Unrecognized("gremlin".into())
        );
    }

    #[test]
    fn output_type_unknown_is_preserved() {
        assert_eq!(OutputType::parse("entity-list"), OutputType::EntityList);
        let odd = OutputType::parse("timeline");
        assert_eq!(odd, OutputType::Unrecognized("timeline".into()));
        assert_eq!(odd.as_str(), "timeline");
    }

    #[test]
    fn step_deserializes_with_default_dependencies() {
        let step: QueryStep = serde_json::from_str(
            r#"{"step_number": 1, "description": "people", "query_type": "petgraph",
                "query": "find nodes with entity_type=PERSON", "expected_output_type": "entity_list"}"#,
        )
        .unwrap();
        assert!(step.depends_on.is_empty());
        assert_eq!(step.query_type, QueryType::NativeTraversal);
        assert_eq!(
            serde_json::to_value(&step).unwrap()["expected_output_type"],
            "entity_list"
        );
    }

    #[test]
    fn missing_field_is_rejected() {
        let parsed: Result<QueryStep, _> =
            serde_json::from_str(r#"{"step_number": 1, "description": "x", "query": "q"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn check_steps_rejects_duplicates_and_zero() {
        let step = |n| QueryStep {
            step_number: n,
            description: String::new(),
            query_type: QueryType::Hybrid,
            query: String::new(),
            expected_output_type: OutputType::EntityList,
            depends_on: vec![],
        };
        assert!(check_steps(&[]).is_ok());
        assert_eq!(check_steps(&[step(0)]), Err(PlanDefect::ZeroStepNumber));
        assert_eq!(
            check_steps(&[step(1), step(1)]),
            Err(PlanDefect::DuplicateStepNumber(1))
        );
        assert!(check_steps(&[step(2), step(1)]).is_ok());
    }
}
