use std::sync::Arc;

use lv2_raw::LV2Urid;
use tracing::debug;

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::features::{FeatureSet, OptionsBlock};
use crate::metadata::{PluginDescriptor, UiDescriptor};
use crate::ui::UiLoader;
use crate::urid::UridMap;
use crate::uris::{
    FLAG_FEATURES, LV2_OPTIONS__OPTIONS, LV2_URID__MAP, LV2_URID__MAP_TYPO_COMPAT,
    LV2_URID__UNMAP, LV2_WORKER__SCHEDULE,
};
use crate::worker::Worker;

/// Host-wide collaborators every instance shares.
pub struct World {
    urids: UridMap,
    config: HostConfig,
    ui_loader: Option<Arc<dyn UiLoader>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl World {
    pub fn new(config: HostConfig) -> Self {
        Self {
            urids: UridMap::new(),
            config,
            ui_loader: None,
        }
    }

    pub fn with_ui_loader(mut self, loader: Arc<dyn UiLoader>) -> Self {
        self.ui_loader = Some(loader);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn urids(&self) -> &UridMap {
        &self.urids
    }

    pub fn map(&self, uri: &str) -> LV2Urid {
        self.urids.map(uri)
    }

    pub fn unmap(&self, urid: LV2Urid) -> Option<String> {
        self.urids.unmap(urid)
    }

    pub fn ui_loader(&self) -> Option<&Arc<dyn UiLoader>> {
        self.ui_loader.as_ref()
    }

    /// Features handed to `instantiate`. Fails when the plugin requires one
    /// this host cannot provide.
    pub fn instance_features(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: f64,
        worker: &Worker,
    ) -> Result<FeatureSet> {
        let mut builder = FeatureSet::builder();
        builder.push(LV2_URID__MAP, self.urids.map_data())?;
        builder.push(LV2_URID__MAP_TYPO_COMPAT, self.urids.map_data())?;
        builder.push(LV2_URID__UNMAP, self.urids.unmap_data())?;
        builder.options(
            LV2_OPTIONS__OPTIONS,
            OptionsBlock::new(&self.urids, &self.config.block, sample_rate),
        )?;
        builder.push(LV2_WORKER__SCHEDULE, worker.schedule_data())?;
        for flag in FLAG_FEATURES {
            builder.push_flag(flag)?;
        }

        let missing: Vec<&str> = descriptor
            .required_features
            .iter()
            .map(String::as_str)
            .filter(|uri| !builder.contains(uri))
            .collect();
        if !missing.is_empty() {
            return Err(HostError::InstantiationFailed {
                uri: descriptor.uri.clone(),
                reason: format!("unsupported required features: {}", missing.join(", ")),
            });
        }
        Ok(builder.build())
    }

    /// Highest quality UI the loader can embed in the configured container.
    pub fn best_ui<'a>(&self, descriptor: &'a PluginDescriptor) -> Option<&'a UiDescriptor> {
        let loader = self.ui_loader.as_ref()?;
        let container = self.config.ui_container_type.as_str();
        let mut best: Option<(u32, &UiDescriptor)> = None;
        for ui in &descriptor.uis {
            let quality = loader.ui_supported(container, &ui.type_uri);
            debug!("UI {} ({}) quality {quality} in {container}", ui.uri, ui.type_uri);
            if quality == 0 {
                continue;
            }
            if best.is_none_or(|(best_quality, _)| quality > best_quality) {
                best = Some((quality, ui));
            }
        }
        best.map(|(_, ui)| ui)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDescriptor, PortFlow};
    use crate::uris::{LV2_BUF_SIZE__BOUNDED_BLOCK_LENGTH, LV2_UI__GTK3_UI, LV2_UI__X11_UI};

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor::new(
            "urn:test:world",
            "World",
            vec![PortDescriptor::audio(0, PortFlow::Input, "in")],
        )
        .unwrap()
    }

    #[test]
    fn features_cover_required_set() {
        let world = World::default();
        let worker = Worker::new(64, 16);
        let desc = descriptor()
            .with_required_feature(LV2_URID__MAP)
            .with_required_feature(LV2_BUF_SIZE__BOUNDED_BLOCK_LENGTH);
        let features = world.instance_features(&desc, 44_100.0, &worker).unwrap();
        assert!(features.contains(LV2_URID__UNMAP));
        assert!(features.contains(LV2_OPTIONS__OPTIONS));
        assert_eq!(features.data(LV2_WORKER__SCHEDULE), Some(worker.schedule_data()));
        assert_eq!(features.data(LV2_URID__MAP), Some(world.urids().map_data()));
    }

    #[test]
    fn unknown_required_feature_fails() {
        let world = World::default();
        let worker = Worker::new(64, 16);
        let desc = descriptor().with_required_feature("urn:unknown#feature");
        let err = match world.instance_features(&desc, 44_100.0, &worker) {
            Err(err) => err,
            Ok(_) => panic!("expected failure"),
        };
        assert!(err.to_string().contains("urn:unknown#feature"));
    }

    struct X11Only;

    impl UiLoader for X11Only {
        fn ui_supported(&self, container: &str, ui_type: &str) -> u32 {
            match (container == LV2_UI__X11_UI, ui_type) {
                (true, LV2_UI__X11_UI) => 2,
                (true, LV2_UI__GTK3_UI) => 1,
                _ => 0,
            }
        }

        fn instantiate(
            &self,
            _request: crate::ui::UiRequest<'_>,
        ) -> Option<Box<dyn crate::ui::NativeUi>> {
            None
        }
    }

    #[test]
    fn best_ui_prefers_native_container() {
        let ui = |uri: &str, type_uri: &str| UiDescriptor {
            uri: uri.into(),
            type_uri: type_uri.into(),
            bundle_path: "/tmp/bundle".into(),
            binary_path: "/tmp/bundle/ui.so".into(),
        };
        let desc = descriptor()
            .with_ui(ui("urn:ui:gtk", LV2_UI__GTK3_UI))
            .with_ui(ui("urn:ui:x11", LV2_UI__X11_UI))
            .with_ui(ui("urn:ui:qt", "http://lv2plug.in/ns/extensions/ui#Qt5UI"));

        assert!(World::default().best_ui(&desc).is_none());
        let world = World::default().with_ui_loader(Arc::new(X11Only));
        assert_eq!(world.best_ui(&desc).map(|ui| ui.uri.as_str()), Some("urn:ui:x11"));
    }
}
