use postconfirm_settings::Settings;

/// Minimal concrete [`Settings`] view: reads `POSTCONFIRM_<KEY>` from
/// the process environment, upper-cased with `.` replaced by `_`.
/// Configuration *file* loading is an external collaborator (§1); this
/// is the simplest thing that can hand a real value to [`AppConfig::
/// load`](postconfirm_settings::AppConfig::load) without one.
pub struct EnvSettings;

impl Settings for EnvSettings {
    fn get(&self, key: &str) -> Option<&str> {
        let var_name = format!("POSTCONFIRM_{}", key.to_uppercase().replace('.', "_"));
        // Leaked once per process: `Settings::get` returns a borrow, and
        // environment values otherwise only live as a temporary String.
        std::env::var(var_name).ok().map(|v| &*Box::leak(v.into_boxed_str()))
    }
}
