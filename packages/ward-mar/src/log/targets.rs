use crate::config::LogLevel;

// Define all log targets in one place
macro_rules! define_log_targets {
    ($(($const_name:ident, $field_name:ident, $target_str:literal)),* $(,)?) => {
        // Generate target constants
        $(
            pub const $const_name: &str = $target_str;
        )*

        // Generate function to get all target names
        pub fn log_targets() -> Vec<&'static str> {
            vec![
                $(
                    $const_name,
                )*
            ]
        }

        // Generate function to map target to log level
        pub fn log_level_for(config: &crate::config::LogConfig, target: &str) -> LogLevel {
            match target {
                $(
                    $const_name => config.$field_name,
                )*
                _ => config.level,
            }
        }

        // Compile-time validation that LogConfig has all required fields
        // This will fail to compile if any field is missing from LogConfig
        pub const fn validate_log_config_fields() {
            use crate::config::LogConfig;

            let _config = LogConfig {
                ansi_enabled: true,
                format: crate::config::LogFormat::Pretty,
                output: crate::config::LogOutput::Stdout,
                level: LogLevel::Info,
                $(
                    $field_name: LogLevel::Info,
                )*
            };
        }

        // NOTE: LogConfig fields in config/log.rs must be kept in sync with the targets defined here.
        //
        // When adding a new target (NEWTARGET, new_target_level, "new_target"):
        // 1. Add the target to the define_log_targets! macro invocation below
        // 2. Add this field to LogConfig struct in config/log.rs:
        //    #[serde(default = "LogConfig::default_log_level")]
        //    pub new_target_level: LogLevel,
        // 3. Add this assignment to with_level() method in config/log.rs:
        //    new_target_level: level,
        //
        // The validate_log_config_fields() function will fail to compile if fields are missing.
    };
}

define_log_targets!(
    (DEVELOPMENT, development_level, "development"),
    (ACKNOWLEDGE, acknowledge_level, "acknowledge"),
    (ADMINISTRATION, administration_level, "administration"),
    (API, api_level, "api"),
    (CONFIG, config_level, "config"),
    (GATE, gate_level, "gate"),
    (MIGRATE, migrate_level, "migrate"),
    (ORDERS, orders_level, "orders"),
    (SCHEDULE, schedule_level, "schedule"),
    (STORE, store_level, "store"),
    (SWEEP, sweep_level, "sweep"),
);

// Trigger compile-time validation
const _: () = validate_log_config_fields();
