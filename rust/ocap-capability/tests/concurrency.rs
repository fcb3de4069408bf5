//! Concurrent use of a shared store.
mod concurrency {
    use ocap_capability::{
        Agent, Capability, CapabilitySet, CapabilityStore, Reference, ReferenceStore, Target,
        UserId, Volatile,
    };
    use testresult::TestResult;

    struct Object;

    impl Target for Object {
        type Key = u64;
        const KIND: &'static str = "object";
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn it_creates_each_capability_once() -> TestResult {
        let store = Volatile::new();
        let candidates: Vec<Capability> = (0..8)
            .map(|index| Capability::new(format!("action_{index}"), index % 3))
            .collect();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let candidates = candidates.clone();
                tokio::spawn(async move { store.get_or_create_many(&candidates).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await??, candidates);
        }
        assert_eq!(store.capability_count(), candidates.len());
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn it_keeps_one_derivation_per_receiver() -> TestResult {
        let store = Volatile::new();
        let owner = Agent::user(UserId(0));
        let receiver = Agent::user(UserId(1));

        let root =
            Reference::<Object>::create(&store, &owner, 1, [Capability::new("read", 2)]).await?;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (store, root, receiver) = (store.clone(), root.clone(), receiver.clone());
                tokio::spawn(async move { root.derive(&store, &receiver, None, false).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await? {
                Ok(_) => created += 1,
                Err(error) => assert!(error.is_conflict()),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.reference_count(), 2);
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn it_settles_an_update_racing_an_insert() -> TestResult {
        for _ in 0..16 {
            let store = Volatile::new();
            let owner = Agent::user(UserId(0));
            let receiver = Agent::user(UserId(1));

            let root =
                Reference::<Object>::create(&store, &owner, 1, [Capability::new("read", 2)])
                    .await?;

            let insert = {
                let (store, root, receiver) = (store.clone(), root.clone(), receiver.clone());
                tokio::spawn(async move { root.derive(&store, &receiver, None, false).await })
            };
            let update = {
                let (store, root, receiver) = (store.clone(), root.clone(), receiver.clone());
                tokio::spawn(async move { root.derive(&store, &receiver, None, true).await })
            };

            let updated = update.await??;
            if let Err(error) = insert.await? {
                assert!(error.is_conflict());
            }

            let held: Vec<Reference<Object>> = store.find_by_receiver(&receiver).await?;
            assert_eq!(held, vec![updated]);
            assert_eq!(
                held[0].capabilities(),
                &CapabilitySet::new([Capability::new("read", 1)])?
            );
            assert_eq!(store.reference_count(), 2);
        }
        Ok(())
    }
}
