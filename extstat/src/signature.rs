//! Process wide registry of statistics definitions already created, keyed by relation.
//!
//! A definition is summarized by its signature: the sorted column numbers and expression
//! hashes. Lookups are cheap and lock a single bucket for reading, so the common "not seen
//! yet" answer doesn't block other sessions. A hit only means some earlier definition had the
//! same signature; the full comparison against the catalog still decides what to create.

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet, RandomState};
use log::debug;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::stat::{ColumnSet, HostExpr, RelationId};

/// Extended statistics can't have more dimensions than this.
pub const MAX_STAT_DIMENSIONS: usize = 8;

const BUCKETS: usize = 16;

const SIGNATURE_RANDOM_STATE: RandomState = RandomState::with_seeds(0x5157, 0x4d43, 0x6e64, 0x6478);

lazy_static! {
    static ref GLOBAL_SIGNATURES: Arc<SignatureCache> = Arc::new(SignatureCache::new());
}

/// Sorted column numbers and expression hashes of a definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DefinitionSignature(SmallVec<[u32; MAX_STAT_DIMENSIONS]>);

impl DefinitionSignature {
    /// `None` when the definition has more dimensions than statistics allow.
    pub fn new<E: HostExpr>(columns: &ColumnSet, expressions: &[E]) -> Option<Self> {
        if columns.len() + expressions.len() > MAX_STAT_DIMENSIONS {
            return None;
        }

        let mut slots: SmallVec<[u32; MAX_STAT_DIMENSIONS]> = columns
            .iter()
            .map(u32::from)
            .chain(expressions.iter().map(expression_hash))
            .collect();
        slots.sort_unstable();

        Some(Self(slots))
    }

    pub fn slots(&self) -> &[u32] {
        &self.0
    }
}

/// Hash of the canonical form of an expression. Never 0, which marks an unused slot.
pub fn expression_hash<E: HostExpr>(expr: &E) -> u32 {
    let mut hasher = SIGNATURE_RANDOM_STATE.build_hasher();
    expr.canonical_string().hash(&mut hasher);

    match hasher.finish() as u32 {
        0 => 1,
        hash => hash,
    }
}

type Bucket = RwLock<AHashMap<RelationId, AHashSet<DefinitionSignature>>>;

pub struct SignatureCache {
    buckets: Vec<Bucket>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| RwLock::new(AHashMap::new())).collect(),
        }
    }

    /// Instance shared by every session of the process, created on first use.
    pub fn global() -> Arc<SignatureCache> {
        GLOBAL_SIGNATURES.clone()
    }

    fn bucket(&self, relation: RelationId) -> &Bucket {
        let mut hasher = SIGNATURE_RANDOM_STATE.build_hasher();
        relation.hash(&mut hasher);
        &self.buckets[(hasher.finish() as usize) % BUCKETS]
    }

    pub fn exists(&self, relation: RelationId, signature: &DefinitionSignature) -> bool {
        let found = self
            .bucket(relation)
            .read()
            .get(&relation)
            .map(|signatures| signatures.contains(signature))
            .unwrap_or(false);

        if found {
            debug!("Signature {:?} of relation {} is known", signature.slots(), relation);
        }
        found
    }

    /// Returns false if the signature was already registered by someone else.
    pub fn register(&self, relation: RelationId, signature: DefinitionSignature) -> bool {
        self.bucket(relation)
            .write()
            .entry(relation)
            .or_default()
            .insert(signature)
    }

    /// Removes one signature, returns whether it was registered.
    pub fn forget(&self, relation: RelationId, signature: &DefinitionSignature) -> bool {
        let mut bucket = self.bucket(relation).write();
        let removed = bucket
            .get_mut(&relation)
            .map(|signatures| signatures.remove(signature))
            .unwrap_or(false);
        if bucket.get(&relation).map_or(false, |signatures| signatures.is_empty()) {
            bucket.remove(&relation);
        }
        removed
    }

    /// Removes every signature of the relation, after its statistics were dropped.
    pub fn forget_relation(&self, relation: RelationId) {
        if self.bucket(relation).write().remove(&relation).is_some() {
            debug!("Forgot statistics signatures of relation {}", relation);
        }
    }

    /// Number of registered signatures.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.read().values().map(|signatures| signatures.len()).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::signature::{expression_hash, DefinitionSignature, SignatureCache};
    use crate::stat::RelationId;
    use crate::test_utils::{column_set, expr, TestExpr};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signature_is_order_insensitive() {
        let a = DefinitionSignature::new(&column_set(&[3, 1]), &[expr("a + b"), expr("lower(c)")])
            .unwrap();
        let b = DefinitionSignature::new(&column_set(&[1, 3]), &[expr("lower(c)"), expr("a + b")])
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(4, a.slots().len());
        assert!(a.slots().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_expression_hash() {
        assert_eq!(expression_hash(&expr("a + b")), expression_hash(&expr("a + b")));
        assert_ne!(0, expression_hash(&expr("")));
    }

    #[test]
    fn test_too_many_dimensions() {
        let columns = column_set(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(DefinitionSignature::new::<TestExpr>(&columns, &[]).is_some());
        assert!(DefinitionSignature::new(&columns, &[expr("x")]).is_none());
    }

    #[test]
    fn test_register_and_forget() {
        let cache = SignatureCache::new();
        let relation = RelationId::from(16384);
        let other = RelationId::from(16390);
        let signature = DefinitionSignature::new::<TestExpr>(&column_set(&[1, 2]), &[]).unwrap();

        assert!(!cache.exists(relation, &signature));
        assert!(cache.register(relation, signature.clone()));
        assert!(!cache.register(relation, signature.clone()));
        assert!(cache.exists(relation, &signature));
        assert!(!cache.exists(other, &signature));
        assert_eq!(1, cache.len());

        cache.forget_relation(relation);
        assert!(!cache.exists(relation, &signature));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_forget_one_signature() {
        let cache = SignatureCache::new();
        let relation = RelationId::from(16384);
        let ab = DefinitionSignature::new::<TestExpr>(&column_set(&[1, 2]), &[]).unwrap();
        let ac = DefinitionSignature::new(&column_set(&[1]), &[expr("lower(c)")]).unwrap();

        cache.register(relation, ab.clone());
        cache.register(relation, ac.clone());

        assert!(cache.forget(relation, &ab));
        assert!(!cache.forget(relation, &ab));
        assert!(!cache.exists(relation, &ab));
        assert!(cache.exists(relation, &ac));

        assert!(cache.forget(relation, &ac));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_register_has_one_winner() {
        let cache = Arc::new(SignatureCache::new());
        let relation = RelationId::from(1);

        let handles = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let signature =
                        DefinitionSignature::new::<TestExpr>(&column_set(&[1, 2]), &[]).unwrap();
                    cache.register(relation, signature)
                })
            })
            .collect::<Vec<_>>();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(1, winners);
    }
}
