use std::collections::HashSet;

use rand::{rngs::StdRng, Rng, SeedableRng};
use ruint::aliases::U256;

use crate::{
    db::{Db, DbResult, MemoryDb},
    felt::Felt,
    trie::BinaryTrie,
    TrieConfig,
};

pub(crate) type TestEntry = (Felt, Felt);

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

pub(crate) fn memory_trie(height: usize) -> BinaryTrie<MemoryDb> {
    BinaryTrie::new(MemoryDb::default(), TrieConfig::with_height(height)).unwrap()
}

pub(crate) fn felt(v: u64) -> Felt {
    Felt::from(v)
}

/// `n` entries with distinct keys that fit in `height` bits and non-zero
/// values.
pub(crate) fn generate_n_random_entries(n: usize, height: usize, seed: u64) -> Vec<TestEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(n);

    while entries.len() < n {
        let key = gen_felt_below(&mut rng, height);
        if seen.insert(key) {
            entries.push((key, gen_non_zero_value(&mut rng)));
        }
    }

    entries
}

pub(crate) fn gen_non_zero_value(rng: &mut StdRng) -> Felt {
    loop {
        let value = gen_felt_below(rng, 251);
        if !value.is_zero() {
            return value;
        }
    }
}

fn gen_felt_below(rng: &mut StdRng, bits: usize) -> Felt {
    let mask = (U256::from(1u64) << bits) - U256::from(1u64);
    let raw = U256::from_limbs(rng.gen::<[u64; 4]>()) & mask;
    Felt::new(raw).unwrap()
}

/// A [`MemoryDb`] whose reads and writes can be made to fail on demand.
#[derive(Debug, Default)]
pub(crate) struct FlakyDb {
    pub(crate) inner: MemoryDb,
    pub(crate) fail_loads: bool,
    pub(crate) fail_stores: bool,
}

impl Db for FlakyDb {
    fn load(&self, hash: &Felt) -> DbResult<Option<Vec<u8>>> {
        if self.fail_loads {
            return Err(format!("injected load failure for {hash}").into());
        }
        self.inner.load(hash)
    }

    fn store(&mut self, hash: Felt, bytes: Vec<u8>) -> DbResult<()> {
        if self.fail_stores {
            return Err(format!("injected store failure for {hash}").into());
        }
        self.inner.store(hash, bytes)
    }
}
