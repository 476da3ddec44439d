use candle_core::Device;
use tracing::info;

/// Metal when built with the `metal` feature and available, unless
/// `APP_DEVICE=cpu`; CPU otherwise.
pub fn select_device() -> Device {
    let force_cpu = std::env::var("APP_DEVICE").map(|v| v.eq_ignore_ascii_case("cpu")).unwrap_or(false);
    #[cfg(feature = "metal")]
    {
        if !force_cpu {
            match Device::new_metal(0) {
                Ok(dev) => {
                    info!(device = "metal", "embedding device selected");
                    return dev;
                }
                Err(e) => tracing::warn!(error = %e, "metal unavailable"),
            }
        }
    }
    info!(device = "cpu", forced = force_cpu, "embedding device selected");
    Device::Cpu
}
