//! Concurrent transfers with independent uploader instances.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use ferry_testing::TestEnv;
use proptest::prelude::*;

async fn run_concurrently(env: &TestEnv, sizes: &[usize]) -> Vec<StatusCode> {
    let mut requests = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        let builder = env.event().event_id(format!("e{i}")).key(format!("uploads/file-{i}.bin"));
        let byte = u8::try_from(i % 251).unwrap();
        env.serve_object(&builder, vec![byte; *size]);
        requests.push(builder.size(*size as u64).build());
    }

    let responses = futures::future::join_all(requests.iter().map(|webhook| env.post(webhook))).await;
    responses.into_iter().map(|r| r.status).collect()
}

#[tokio::test]
async fn two_objects_do_not_interleave() {
    let env = TestEnv::new();
    let statuses = run_concurrently(&env, &[1024, 4096]).await;

    assert!(statuses.iter().all(|s| *s == StatusCode::OK));
    assert_eq!(env.uploaders.fs().file(&env.expected_path("uploads/file-0.bin")).unwrap(), vec![0u8; 1024]);
    assert_eq!(env.uploaders.fs().file(&env.expected_path("uploads/file-1.bin")).unwrap(), vec![1u8; 4096]);
    assert_eq!(env.uploaders.counters().created(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn n_concurrent_transfers_yield_n_distinct_correct_files(
        sizes in prop::collection::vec(1usize..3000, 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let env = TestEnv::new();

        let statuses = runtime.block_on(run_concurrently(&env, &sizes));
        prop_assert!(statuses.iter().all(|s| *s == StatusCode::OK));

        let files: BTreeMap<String, Vec<u8>> = env
            .uploaders
            .fs()
            .paths()
            .into_iter()
            .map(|p| {
                let contents = env.uploaders.fs().file(&p).unwrap();
                (p, contents)
            })
            .collect();
        prop_assert_eq!(files.len(), sizes.len());

        for (i, size) in sizes.iter().enumerate() {
            let path = env.expected_path(&format!("uploads/file-{i}.bin"));
            let contents = &files[&path];
            prop_assert_eq!(contents.len(), *size);
            let byte = u8::try_from(i % 251).unwrap();
            prop_assert!(contents.iter().all(|b| *b == byte));
        }

        let counters = env.uploaders.counters();
        prop_assert_eq!(counters.created(), sizes.len());
        prop_assert_eq!(counters.connects(), counters.closes());
    }
}
