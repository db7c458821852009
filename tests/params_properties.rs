// tests/params_properties.rs

use std::collections::HashMap;

use proptest::prelude::*;
use procworker::ParameterSet;

// A small name space so overwrites are common.
fn op_strategy() -> impl Strategy<Value = (String, Vec<u8>)> {
    (
        prop::sample::select(vec!["a", "b", "c", "duration", "exit_code"]),
        proptest::collection::vec(any::<u8>(), 0..16),
    )
        .prop_map(|(name, value)| (name.to_string(), value))
}

proptest! {
    #[test]
    fn last_write_wins(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let mut set = ParameterSet::new();
        let mut model: HashMap<String, Vec<u8>> = HashMap::new();

        for (name, value) in ops {
            let previous = set.set(name.clone(), value.clone());
            prop_assert_eq!(previous, model.insert(name, value));
        }

        prop_assert_eq!(set.len(), model.len());
        for (name, value) in &model {
            prop_assert_eq!(set.get(name), Some(value.as_slice()));
        }
    }

    #[test]
    fn collecting_matches_sequential_sets(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let collected: ParameterSet = ops.clone().into_iter().collect();
        let mut sequential = ParameterSet::new();
        for (name, value) in ops {
            sequential.set(name, value);
        }
        prop_assert_eq!(&collected, &sequential);

        // Names come out sorted and unique.
        let names: Vec<&str> = collected.iter().map(|(n, _)| n).collect();
        prop_assert!(names.windows(2).all(|w| w[0] < w[1]));
    }
}
