mod mock_backend;

use std::sync::Arc;

use eltako_gateway_lib::config::Settings;
use eltako_gateway_lib::device::{ConfigEntry, GatewayConfig};
use eltako_gateway_lib::flow::{
    EntryStore, FieldKind, FlowResult, FlowStep, JsonEntryStore, MemoryEntryStore, SetupFlow,
    SetupInput, ABORT_SINGLE_INSTANCE, CONF_SERIAL_PATH, ERROR_INVALID_GATEWAY_PATH,
    MANUAL_PATH_VALUE,
};
use eltako_gateway_lib::serial::protocol::esp2_frame;
use mock_backend::{MockBackend, Reply};

const SETTINGS: &str = r#"
probe_timeout_ms = 150
settle_ms = 0

[[gateway]]
id = 1
name = "Board"
device_type = "fam14"
"#;

const LABEL: &str = "Board - fam14 (Id: 1)";

fn settings() -> Settings {
    Settings::from_toml_str(SETTINGS).expect("valid settings")
}

fn esp2_ack() -> Vec<u8> {
    esp2_frame(0x8B, 0x98, [0; 9])
}

fn flow_with(backend: Arc<MockBackend>, store: Arc<dyn EntryStore>) -> SetupFlow {
    SetupFlow::from_settings(&settings(), backend, store).expect("flow")
}

fn select_options(result: &FlowResult, field: &str) -> Vec<String> {
    match result {
        FlowResult::Form { fields, .. } => fields
            .iter()
            .find(|f| f.name == field)
            .and_then(|f| match &f.kind {
                FieldKind::Select { options } => Some(options.clone()),
                FieldKind::Text => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn detected_ports_are_offered_with_manual_choice() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Bytes(esp2_ack())));
    let flow = flow_with(backend, Arc::new(MemoryEntryStore::new()));

    let result = flow.step_user().await.unwrap();

    assert_eq!(result.step_id(), Some(FlowStep::Detect));
    assert_eq!(select_options(&result, "device"), vec![LABEL.to_string()]);
    assert_eq!(
        select_options(&result, CONF_SERIAL_PATH),
        vec!["/dev/ttyUSB0".to_string(), MANUAL_PATH_VALUE.to_string()]
    );
}

#[tokio::test]
async fn no_detected_ports_falls_back_to_manual() {
    let flow = flow_with(Arc::new(MockBackend::new()), Arc::new(MemoryEntryStore::new()));

    let result = flow.step_user().await.unwrap();

    assert_eq!(result.step_id(), Some(FlowStep::Manual));
}

#[tokio::test]
async fn valid_selection_creates_entry() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Bytes(esp2_ack())));
    let store = Arc::new(MemoryEntryStore::new());
    let flow = flow_with(backend.clone(), store.clone());

    let result = flow
        .step_detect(Some(SetupInput::new(LABEL, "/dev/ttyUSB0")))
        .await
        .unwrap();

    let FlowResult::CreateEntry { entry } = result else {
        panic!("expected an entry, got {:?}", result);
    };
    assert_eq!(entry.title, "Eltako");
    assert_eq!(entry.data, GatewayConfig::new("/dev/ttyUSB0").with_device(LABEL));
    assert_eq!(store.entries().await.unwrap(), vec![entry]);
    assert_eq!(backend.opened_at.lock().unwrap()[0].1, 57600);
    assert_eq!(backend.live_handles(), 0);
}

#[tokio::test]
async fn invalid_selection_reshows_detect_with_generic_error() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Silence));
    let store = Arc::new(MemoryEntryStore::new());
    let flow = flow_with(backend, store.clone());

    let result = flow
        .step_detect(Some(SetupInput::new(LABEL, "/dev/ttyUSB0")))
        .await
        .unwrap();

    match &result {
        FlowResult::Form { step_id, errors, .. } => {
            assert_eq!(*step_id, FlowStep::Detect);
            assert_eq!(
                errors.get(CONF_SERIAL_PATH).map(String::as_str),
                Some(ERROR_INVALID_GATEWAY_PATH)
            );
        }
        other => panic!("expected a form, got {:?}", other),
    }
    assert!(store.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_choice_switches_step() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Silence));
    let flow = flow_with(backend.clone(), Arc::new(MemoryEntryStore::new()));

    let result = flow
        .step_detect(Some(SetupInput::new(LABEL, MANUAL_PATH_VALUE)))
        .await
        .unwrap();

    assert_eq!(result.step_id(), Some(FlowStep::Manual));
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn failed_manual_path_is_kept_as_default() {
    let flow = flow_with(Arc::new(MockBackend::new()), Arc::new(MemoryEntryStore::new()));

    let result = flow
        .step_manual(Some(SetupInput::new(LABEL, "/dev/ttyAMA0")))
        .await
        .unwrap();

    let FlowResult::Form { step_id, fields, errors } = result else {
        panic!("expected a form");
    };
    assert_eq!(step_id, FlowStep::Manual);
    let path_field = fields.iter().find(|f| f.name == CONF_SERIAL_PATH).unwrap();
    assert_eq!(path_field.default.as_deref(), Some("/dev/ttyAMA0"));
    assert_eq!(errors.get(CONF_SERIAL_PATH).map(String::as_str), Some(ERROR_INVALID_GATEWAY_PATH));
}

#[tokio::test]
async fn failed_detect_without_ports_keeps_error_and_path() {
    // The selected port is gone by the time the form comes back
    let backend = Arc::new(MockBackend::new());
    let flow = flow_with(backend.clone(), Arc::new(MemoryEntryStore::new()));

    let result = flow
        .step_detect(Some(SetupInput::new(LABEL, "/dev/ttyUSB0")))
        .await
        .unwrap();

    let FlowResult::Form { step_id, fields, errors } = result else {
        panic!("expected a form");
    };
    assert_eq!(step_id, FlowStep::Manual);
    let path_field = fields.iter().find(|f| f.name == CONF_SERIAL_PATH).unwrap();
    assert_eq!(path_field.default.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(errors.get(CONF_SERIAL_PATH).map(String::as_str), Some(ERROR_INVALID_GATEWAY_PATH));
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn unresolved_device_type_is_rejected() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Bytes(esp2_ack())));
    let flow = flow_with(backend.clone(), Arc::new(MemoryEntryStore::new()));

    let result = flow
        .step_manual(Some(SetupInput::new("UNKNOWN-DEVICE", "/dev/ttyUSB0")))
        .await
        .unwrap();

    assert_eq!(result.step_id(), Some(FlowStep::Manual));
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn existing_entry_aborts() {
    let store = Arc::new(MemoryEntryStore::new());
    store
        .create(ConfigEntry::new("Eltako", GatewayConfig::new("/dev/ttyUSB0")))
        .await
        .unwrap();
    let flow = flow_with(Arc::new(MockBackend::new()), store);

    let result = flow.step_user().await.unwrap();

    assert_eq!(
        result,
        FlowResult::Abort {
            reason: ABORT_SINGLE_INSTANCE.to_string()
        }
    );
}

#[tokio::test]
async fn preset_path_is_stored_without_probing() {
    let mut settings = settings();
    settings.serial_path = Some("/dev/ttyUSB3".to_string());

    let backend = Arc::new(MockBackend::new());
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonEntryStore::new(dir.path().join("entries.json")));
    let flow = SetupFlow::from_settings(&settings, backend.clone(), store.clone()).unwrap();

    let result = flow.step_user().await.unwrap();

    assert!(matches!(result, FlowResult::CreateEntry { .. }));
    let stored = store.entries().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].data, GatewayConfig::new("/dev/ttyUSB3"));
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_path_is_never_probed_concurrently() {
    let backend = Arc::new(MockBackend::new().with_port("/dev/ttyUSB0", Reply::Silence));
    let flow = flow_with(backend.clone(), Arc::new(MemoryEntryStore::new()));
    let input = SetupInput::new(LABEL, "/dev/ttyUSB0");

    let (first, second) = tokio::join!(flow.validate_input(&input), flow.validate_input(&input));

    assert!(!first.unwrap());
    assert!(!second.unwrap());
    // The second attempt is refused while the first holds the port
    assert_eq!(backend.open_count(), 1);
}
