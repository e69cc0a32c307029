mod common;

use std::sync::Arc;

use common::{MockLoader, UiExtensions};
use lv2host_engine::port::INVALID_PORT_INDEX;
use lv2host_engine::uris::{LV2_INSTANCE_ACCESS, LV2_UI__PARENT, LV2_UI__RESIZE, LV2_URID__MAP};
use lv2host_engine::{HostError, Instance, World};

fn instance_with(loader: MockLoader) -> (Instance, Arc<parking_lot::Mutex<common::UiRecord>>) {
    let record = loader.record.clone();
    let world = World::default().with_ui_loader(Arc::new(loader));
    let mut instance = common::notifier_instance(world);
    instance.instantiate(48_000.0).unwrap();
    instance.activate();
    (instance, record)
}

#[test]
fn editor_needs_an_instance_and_a_loader() {
    let mut unloaded = common::notifier_instance(World::default());
    assert!(matches!(
        unloaded.create_editor(),
        Err(HostError::BindingUnavailable(_))
    ));
    unloaded.instantiate(48_000.0).unwrap();
    assert!(matches!(
        unloaded.create_editor(),
        Err(HostError::BindingUnavailable(_))
    ));

    let mut loader = MockLoader::new(UiExtensions::default());
    loader.supported = false;
    let (mut instance, _) = instance_with(loader);
    assert!(matches!(
        instance.create_editor(),
        Err(HostError::BindingUnavailable(_))
    ));
    assert!(instance.editor().is_none());
}

#[test]
fn instantiate_pushes_initial_controls_and_features() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    let editor = instance.create_editor().unwrap();
    assert!(!editor.loaded());
    assert_eq!(editor.ui().uri, common::NOTIFIER_UI_URI);
    let mut parent = 0_u8;
    editor
        .instantiate((&mut parent as *mut u8).cast())
        .unwrap();
    assert!(editor.loaded());
    assert!(!editor.widget().is_null());

    let record = record.lock();
    for uri in [LV2_UI__PARENT, LV2_UI__RESIZE, LV2_INSTANCE_ACCESS, LV2_URID__MAP] {
        assert!(record.feature_uris.iter().any(|f| f == uri), "missing {uri}");
    }
    assert_eq!(record.floats(common::GAIN), vec![1.0]);
    assert_eq!(record.floats(common::MODE), vec![0.0]);
    assert_eq!(record.floats(common::LEVEL), vec![0.0]);
}

#[test]
fn ui_writes_flow_into_the_plugin_and_back() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    instance
        .create_editor()
        .unwrap()
        .instantiate(std::ptr::null_mut())
        .unwrap();

    {
        let record = record.lock();
        assert_eq!(record.index_of("gain"), common::GAIN);
        assert_eq!(record.index_of("bogus"), INVALID_PORT_INDEX);
        record.write_float(common::GAIN, 2.5);
    }
    instance.run(16);
    assert_eq!(instance.control_value(common::GAIN).unwrap(), 2.5);

    instance.send_port_events();
    assert_eq!(record.lock().floats(common::GAIN), vec![1.0, 2.5]);
}

#[test]
fn capabilities_follow_the_loaded_extensions() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    let editor = instance.create_editor().unwrap();
    editor.instantiate(std::ptr::null_mut()).unwrap();
    assert!(!editor.have_client_resize());
    assert!(!editor.have_show_interface());
    assert!(!editor.have_idle_interface());
    assert!(!editor.request_size(100, 100));
    assert!(!editor.show());
    assert!(!editor.idle());
    assert!(!instance.idle_editor());
    assert_eq!(record.lock().idle_calls, 0);

    let extensions = UiExtensions {
        resize: true,
        idle: true,
        show: true,
    };
    let (mut instance, record) = instance_with(MockLoader::new(extensions));
    let editor = instance.create_editor().unwrap();
    editor.instantiate(std::ptr::null_mut()).unwrap();
    assert!(editor.have_client_resize());
    assert!(editor.have_show_interface());
    assert!(editor.have_idle_interface());
    assert!(editor.request_size(640, 480));
    assert!(editor.show());
    assert!(instance.idle_editor());

    let record = record.lock();
    assert_eq!(record.client_size, Some((640, 480)));
    assert_eq!(record.shown, 1);
    assert_eq!(record.idle_calls, 1);
}

#[test]
fn unload_is_idempotent_and_hides_the_ui() {
    let extensions = UiExtensions {
        show: true,
        ..UiExtensions::default()
    };
    let (mut instance, record) = instance_with(MockLoader::new(extensions));
    let editor = instance.create_editor().unwrap();
    editor.instantiate(std::ptr::null_mut()).unwrap();
    editor.unload();
    editor.unload();
    assert!(!editor.loaded());
    assert!(editor.widget().is_null());
    assert!(!editor.show());
    {
        let record = record.lock();
        assert!(record.dropped);
        assert_eq!(record.hidden, 1);
    }

    // Events for an unloaded editor go nowhere.
    let before = record.lock().events.len();
    instance.write_control("gain", 0.5).unwrap();
    instance.run(8);
    instance.send_port_events();
    assert_eq!(record.lock().events.len(), before);
}

#[test]
fn refused_ui_reports_binding_unavailable() {
    let mut loader = MockLoader::new(UiExtensions::default());
    loader.refuse = true;
    let (mut instance, _) = instance_with(loader);
    let editor = instance.create_editor().unwrap();
    assert!(matches!(
        editor.instantiate(std::ptr::null_mut()),
        Err(HostError::BindingUnavailable(_))
    ));
    assert!(!editor.loaded());
}

#[test]
fn dropping_the_instance_unloads_the_editor() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    instance
        .create_editor()
        .unwrap()
        .instantiate(std::ptr::null_mut())
        .unwrap();
    drop(instance);
    assert!(record.lock().dropped);
}

#[test]
fn host_resize_requests_reach_the_handler() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    let editor = instance.create_editor().unwrap();
    editor.set_resize_handler(|width, _| width <= 800);
    editor.instantiate(std::ptr::null_mut()).unwrap();
    assert_eq!(editor.requested_size(), None);

    assert_eq!(record.lock().request_host_resize(400, 300), 0);
    assert_eq!(editor.requested_size(), Some((400, 300)));
    assert_ne!(record.lock().request_host_resize(1200, 300), 0);
    assert_ne!(record.lock().request_host_resize(-1, 300), 0);
}

#[test]
fn rate_change_unloads_the_editor() {
    let (mut instance, record) = instance_with(MockLoader::new(UiExtensions::default()));
    instance
        .create_editor()
        .unwrap()
        .instantiate(std::ptr::null_mut())
        .unwrap();
    instance.set_sample_rate(96_000.0).unwrap();
    assert!(instance.editor().is_none());
    assert!(record.lock().dropped);
}
