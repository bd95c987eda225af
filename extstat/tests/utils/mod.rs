use anyhow::Context;
use extstat::catalog::CatalogMutation;
use extstat::comparator::reduce;
use extstat::stat::{
    kinds_from_catalog_codes, CatalogId, ExistingStatDefinition, StatDefinitionCandidate,
    StatKinds,
};
use extstat::test_utils::{column_set, expr, TestExpr};
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Debug;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Kinds are written as catalog codes, e.g. `dfm`.
#[derive(Serialize, Deserialize)]
pub struct StoredDefinition {
    pub id: u32,
    pub columns: Vec<u16>,
    #[serde(default)]
    pub expressions: Vec<String>,
    pub kinds: String,
}

#[derive(Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub columns: Vec<u16>,
    #[serde(default)]
    pub expressions: Vec<String>,
    pub kinds: String,
    #[serde(default)]
    pub existing: Vec<StoredDefinition>,
    pub expected_kinds: String,
    /// `drop <id>` or `alter <id> <kinds>`.
    #[serde(default)]
    pub expected_mutations: Vec<String>,
}

pub struct TestCaseRunner {
    /// Input file path.
    pub paths: Vec<PathBuf>,
}

impl TestCaseRunner {
    pub fn run(self) {
        for path in &self.paths {
            let file = File::options()
                .read(true)
                .open(path)
                .with_context(|| format!("Failed to open test case file: {:?}", &path))
                .unwrap();

            let test_cases: Vec<TestCase> = serde_yaml::from_reader(file)
                .with_context(|| format!("Failed to load test cases from file: {:?}", &path))
                .unwrap();

            for test_case in test_cases {
                self.run_case(path, test_case);
            }
        }
    }

    fn run_case<P: AsRef<Path> + Debug>(&self, path: &P, test_case: TestCase) {
        let candidate = StatDefinitionCandidate::new(
            column_set(&test_case.columns),
            to_exprs(&test_case.expressions),
            parse_kinds(&test_case.kinds),
        )
        .with_context(|| format!("Case {} has less than two dimensions", test_case.name))
        .unwrap();

        let existing = test_case
            .existing
            .iter()
            .map(|stored| ExistingStatDefinition {
                catalog_id: CatalogId::from(stored.id),
                name: format!("s{}", stored.id),
                columns: column_set(&stored.columns),
                expressions: to_exprs(&stored.expressions),
                enabled_kinds: parse_kinds(&stored.kinds),
                stat_target: -1,
            })
            .collect::<Vec<_>>();

        let reduction = reduce(&candidate, &existing);

        assert_eq!(
            test_case.expected_kinds,
            kind_codes(reduction.kept_kinds),
            "Kept kinds of case {} in {:?} are different.",
            test_case.name,
            path
        );
        let mutations = reduction
            .mutations
            .iter()
            .map(mutation_to_string)
            .collect::<Vec<_>>();
        assert_eq!(
            test_case.expected_mutations, mutations,
            "Mutations of case {} in {:?} are different.",
            test_case.name, path
        );
    }
}

fn to_exprs(texts: &[String]) -> Vec<TestExpr> {
    texts.iter().map(|text| expr(text.as_str())).collect()
}

fn parse_kinds(codes: &str) -> StatKinds {
    kinds_from_catalog_codes(codes.chars()).unwrap()
}

fn kind_codes(kinds: StatKinds) -> String {
    kinds.iter().map(|kind| kind.catalog_code()).collect()
}

fn mutation_to_string(mutation: &CatalogMutation) -> String {
    match mutation {
        CatalogMutation::DropDefinition(id) => format!("drop {}", id),
        CatalogMutation::AlterDefinitionKinds(id, kinds) => {
            format!("alter {} {}", id, kind_codes(*kinds))
        }
    }
}
