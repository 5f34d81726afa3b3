use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub server_url: String,
    pub gateway_url: Option<String>,
    pub data_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            gateway_url: None,
            data_dir: "./data".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("gateway_url") {
                settings.gateway_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("data_dir") {
                settings.data_dir = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("TUTORLINK_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("TUTORLINK_GATEWAY_URL") {
        settings.gateway_url = Some(v);
    }
    if let Ok(v) = std::env::var("TUTORLINK_DATA_DIR") {
        settings.data_dir = v;
    }

    settings
}
