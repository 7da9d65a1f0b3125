use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../config.template.toml");

    let template = r#"# ASFIO Configuration Template
# Copy this file to 'config.toml' and adjust the muxer defaults

packet_size = 4800
preroll = 5000
merge_stream_tags = true
padding = 0
streamable = false

# RTP payloader
rtp_mtu = 1400
rtp_payload_type = 96
# rtp_ssrc = 305419896
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
