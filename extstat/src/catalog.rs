//! Boundary to the host's statistics catalog.
//!
//! The catalog decodes its stored rows into [`ExistingStatDefinition`]s before handing them
//! over, and performs every change requested here inside the caller's transaction.

use enum_as_inner::EnumAsInner;
use log::info;

use crate::error::ExtStatResult;
use crate::generator::{IndexDefinition, IndexKey};
use crate::stat::{
    format_kinds, union_expressions, CatalogId, ColumnSet, ExistingStatDefinition, HostExpr,
    RelationId, StatKinds,
};

/// Change to a stored definition requested by the comparator.
#[derive(Clone, Debug, PartialEq, Eq, EnumAsInner)]
pub enum CatalogMutation {
    DropDefinition(CatalogId),
    /// Replaces the kind list. The columns and expressions of the definition are kept.
    AlterDefinitionKinds(CatalogId, StatKinds),
}

/// Dimensions of a definition to create.
#[derive(Clone, Debug, PartialEq)]
pub enum DefinitionBody<E> {
    Multivariate {
        columns: ColumnSet,
        expressions: Vec<E>,
    },
    /// One expression: the row built from the listed keys.
    Row(Vec<IndexKey<E>>),
}

impl<E: HostExpr> DefinitionBody<E> {
    /// Columns and expressions referenced by the body.
    pub fn dimensions(&self) -> (ColumnSet, Vec<E>) {
        match self {
            DefinitionBody::Multivariate {
                columns,
                expressions,
            } => (columns.clone(), expressions.clone()),
            DefinitionBody::Row(keys) => {
                let mut columns = ColumnSet::new();
                let mut expressions = vec![];
                for key in keys {
                    match key {
                        IndexKey::Column(attnum) => {
                            columns.insert(*attnum);
                        }
                        IndexKey::Expression(expr) => {
                            union_expressions(&mut expressions, [expr.clone()])
                        }
                    }
                }
                (columns, expressions)
            }
        }
    }
}

/// Request to create a statistics definition.
#[derive(Clone, Debug, PartialEq)]
pub struct NewStatDefinition<E> {
    pub relation: RelationId,
    pub body: DefinitionBody<E>,
    /// Empty leaves the choice to the catalog, as for single expression statistics.
    pub kinds: StatKinds,
    pub comment: String,
    /// Object whose removal removes the definition too.
    pub depends_on: Option<RelationId>,
}

/// Host statistics catalog.
///
/// Changes aren't seen by later calls until [`StatisticsCatalog::make_visible`].
pub trait StatisticsCatalog<E> {
    fn list_definitions(&self, relation: RelationId)
        -> ExtStatResult<Vec<ExistingStatDefinition<E>>>;

    fn create(&mut self, definition: NewStatDefinition<E>) -> ExtStatResult<CatalogId>;

    fn drop_definition(&mut self, id: CatalogId) -> ExtStatResult<()>;

    fn alter_kinds(&mut self, id: CatalogId, kinds: StatKinds) -> ExtStatResult<()>;

    /// Makes previous changes visible to the following calls of the same transaction.
    fn make_visible(&mut self);
}

/// Looks up index definitions by relation id.
pub trait IndexProvider<E> {
    /// `None` when the relation is gone or isn't an index.
    fn index_definition(&self, index: RelationId) -> ExtStatResult<Option<IndexDefinition<E>>>;
}

/// Applies mutations one by one. Each applied change is made visible before the next one.
///
/// Stops at the first failure, leaving earlier changes applied.
pub fn apply_mutations<E, C>(catalog: &mut C, mutations: &[CatalogMutation]) -> ExtStatResult<()>
where
    C: StatisticsCatalog<E> + ?Sized,
{
    for mutation in mutations {
        match mutation {
            CatalogMutation::DropDefinition(id) => {
                catalog.drop_definition(*id)?;
                info!("Dropped statistics {} superseded by a new definition", id);
            }
            CatalogMutation::AlterDefinitionKinds(id, kinds) => {
                catalog.alter_kinds(*id, *kinds)?;
                info!("Narrowed statistics {} to kinds [{}]", id, format_kinds(*kinds));
            }
        }
        catalog.make_visible();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::{apply_mutations, CatalogMutation, StatisticsCatalog};
    use crate::stat::{CatalogId, RelationId, StatKind};
    use crate::test_utils::{CatalogCall, MemoryCatalog, TestExpr};

    #[test]
    fn test_apply_mutations() {
        let relation = RelationId::from(1);
        let mut catalog = MemoryCatalog::<TestExpr>::default()
            .with_definition(relation, &[1, 2], vec![], StatKind::generated())
            .with_definition(relation, &[1, 3], vec![], StatKind::generated());

        let mutations = vec![
            CatalogMutation::AlterDefinitionKinds(CatalogId::from(101), StatKind::Mcv.into()),
            CatalogMutation::DropDefinition(CatalogId::from(100)),
        ];
        apply_mutations::<TestExpr, _>(&mut catalog, &mutations).unwrap();

        assert_eq!(
            vec![
                CatalogCall::AlterKinds(CatalogId::from(101), StatKind::Mcv.into()),
                CatalogCall::MakeVisible,
                CatalogCall::Drop(CatalogId::from(100)),
                CatalogCall::MakeVisible,
            ],
            catalog.calls
        );

        let remaining = catalog.list_definitions(relation).unwrap();
        assert_eq!(1, remaining.len());
        assert_eq!(StatKind::Mcv, remaining[0].enabled_kinds.iter().next().unwrap());
        assert!(mutations[1].as_drop_definition().is_some());
    }

    #[test]
    fn test_apply_mutations_stops_at_failure() {
        let mut catalog = MemoryCatalog::<TestExpr>::default();

        let mutations = vec![
            CatalogMutation::DropDefinition(CatalogId::from(5)),
            CatalogMutation::DropDefinition(CatalogId::from(6)),
        ];
        assert!(apply_mutations::<TestExpr, _>(&mut catalog, &mutations).is_err());
        assert!(catalog.calls.is_empty());
    }
}
