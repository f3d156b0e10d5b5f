use std::{
    collections::HashSet,
    fs::{self, File},
    sync::{Arc, Mutex},
};

use serde::Deserialize;

use optimizely::{
    cmab::{CmabDecision, CmabError, CmabService},
    Attributes, Client, ClientConfig, DecideOption, DecisionNotification, ProjectConfig,
    UserContext, UserProfile, UserProfileService, UserProfileServiceError,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestFile {
    flag: String,
    subjects: Vec<TestSubject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestSubject {
    user_id: String,
    attributes: Attributes,
    #[serde(default)]
    qualified_segments: Option<HashSet<String>>,
    variation_key: Option<String>,
    rule_key: Option<String>,
    enabled: bool,
}

struct PredictedVariation(&'static str);

impl CmabService for PredictedVariation {
    fn get_decision(
        &self,
        _config: &ProjectConfig,
        user: &UserContext,
        _rule_id: &str,
        _options: &[DecideOption],
    ) -> Result<CmabDecision, CmabError> {
        Ok(CmabDecision {
            variation_id: self.0.to_owned(),
            cmab_uuid: format!("uuid-{}", user.user_id()),
        })
    }
}

#[derive(Clone, Default)]
struct InMemoryProfiles(Arc<Mutex<Vec<UserProfile>>>);

impl UserProfileService for InMemoryProfiles {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
        let profiles = self.0.lock().unwrap();
        Ok(profiles
            .iter()
            .find(|profile| profile.user_id == user_id)
            .cloned())
    }

    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError> {
        let mut profiles = self.0.lock().unwrap();
        profiles.retain(|stored| stored.user_id != profile.user_id);
        profiles.push(profile.clone());
        Ok(())
    }
}

fn datafile() -> String {
    fs::read_to_string("tests/data/datafile.json").unwrap()
}

fn client() -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    ClientConfig::from_datafile(datafile())
        .cmab_service(PredictedVariation("v_cmab_b"))
        .to_client()
        .unwrap()
}

#[test]
fn decisions_test_data() {
    let client = client();

    for entry in fs::read_dir("tests/data/decisions/").unwrap() {
        let entry = entry.unwrap();
        println!("Processing test file: {:?}", entry.path());

        let test_file: TestFile =
            serde_json::from_reader(File::open(entry.path()).unwrap()).unwrap();

        for subject in test_file.subjects {
            print!("test user {:?} ... ", subject.user_id);
            let mut user = client.create_user_context(&subject.user_id, subject.attributes);
            user.set_qualified_segments(subject.qualified_segments);

            let decision = client.decide(&user, &test_file.flag, &[DecideOption::IncludeReasons]);

            assert_eq!(
                (
                    decision.variation_key.as_deref(),
                    decision.rule_key.as_deref(),
                    decision.enabled
                ),
                (
                    subject.variation_key.as_deref(),
                    subject.rule_key.as_deref(),
                    subject.enabled
                ),
                "flag {:?}, reasons: {:#?}",
                test_file.flag,
                decision.reasons
            );
            println!("ok");
        }
    }
}

#[test]
fn sticky_bucketing_survives_traffic_changes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let profiles = InMemoryProfiles::default();
    let client = ClientConfig::from_datafile(datafile())
        .user_profile_service(profiles.clone())
        .cmab_service(PredictedVariation("v_cmab_b"))
        .to_client()
        .unwrap();
    let user = client.create_user_context(
        "user_1",
        [("browser".to_owned(), "chrome".into())].into_iter().collect(),
    );

    let decision = client.decide(&user, "checkout_flow", &[]);
    assert_eq!(decision.variation_key.as_deref(), Some("control"));
    assert_eq!(
        profiles.0.lock().unwrap()[0].variation_id("exp_checkout"),
        Some("v_control")
    );

    // Move all traffic to treatment: the stored decision still wins.
    let updated = datafile().replace(
        r#"{"entityId": "v_control", "endOfRange": 5000}"#,
        r#"{"entityId": "v_control", "endOfRange": 0}"#,
    );
    client.update_config(&updated).unwrap();

    let decision = client.decide(&user, "checkout_flow", &[]);
    assert_eq!(decision.variation_key.as_deref(), Some("control"));

    let decision = client.decide(&user, "checkout_flow", &[DecideOption::IgnoreUserProfileService]);
    assert_eq!(decision.variation_key.as_deref(), Some("treatment"));
}

#[test]
fn decisions_are_stable_across_threads() {
    let client = Arc::new(client());
    let expected = client.decide_all(&client.create_user_context("user_7", Attributes::new()), &[]);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            std::thread::spawn(move || {
                let user = client.create_user_context("user_7", Attributes::new());
                client.decide_all(&user, &[])
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn decision_notifications() {
    let client = client();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        client
            .notification_center()
            .add_decision_listener(move |notification: &DecisionNotification| {
                seen.lock().unwrap().push((
                    notification.flag_key.clone(),
                    notification.variation_key.clone(),
                    notification.enabled,
                ));
            });
    }

    let user = client.create_user_context("user_1", Attributes::new());
    client.decide_for_keys(&user, &["mutex_flag", "paused_flag"], &[]);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("mutex_flag".to_owned(), Some("a_on".to_owned()), true),
            ("paused_flag".to_owned(), None, false),
        ]
    );
}
