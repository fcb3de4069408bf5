//! Capability requests as they arrive from untrusted JSON.
mod requests {
    use std::sync::OnceLock;

    use ocap_capability::{Capability, CapabilityInput};
    use serde_json::Value;
    use testresult::TestResult;

    const FIXTURE_STR: &str = include_str!("./fixtures/requests.json");
    static FIXTURE: OnceLock<Value> = OnceLock::new();
    fn fixture() -> &'static Value {
        FIXTURE.get_or_init(|| serde_json::from_str(FIXTURE_STR).expect("fixture is invalid JSON"))
    }

    #[test]
    fn it_accepts_every_valid_request() -> TestResult {
        let valid = fixture()["valid"].as_array().expect("valid is an array");
        for entry in valid {
            let input = CapabilityInput::parse(&entry["input"])?;
            let expected: Capability = serde_json::from_value(entry["expected"].clone())?;
            assert_eq!(Capability::from(input), expected, "{}", entry["name"]);
        }
        Ok(())
    }

    #[test]
    fn it_rejects_every_invalid_request() {
        let invalid = fixture()["invalid"].as_array().expect("invalid is an array");
        for entry in invalid {
            assert!(
                CapabilityInput::parse(&entry["input"]).is_err(),
                "{} should be rejected",
                entry["name"]
            );
        }
    }

    #[test]
    fn it_rejects_the_whole_list_on_one_bad_entry() {
        let request = serde_json::json!(["read", ["write", 1], 7]);
        assert!(serde_json::from_value::<Vec<CapabilityInput>>(request).is_err());
    }
}
