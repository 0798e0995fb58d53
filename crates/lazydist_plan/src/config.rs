use std::collections::HashMap;
use std::sync::LazyLock;

use lazydist_error::{DbError, Result};
use lazydist_types::scalar::ScalarValue;

pub const RUN_PARALLEL_ENV: &str = "LAZYDIST_RUN_PARALLEL";
pub const DUMP_PLANS_ENV: &str = "LAZYDIST_DUMP_PLANS";
pub const PROFILE_ENV: &str = "LAZYDIST_PROFILE";

/// A setting with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub value: ScalarValue,
}

/// Configuration for executing plans.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionConfig {
    /// Run plans on the process group instead of in this process.
    pub run_parallel: bool,
    /// Log plans before and after optimization.
    pub dump_plans: bool,
    /// Log time spent converting, optimizing and executing.
    pub profile: bool,
}

impl ExecutionConfig {
    /// Read settings from the current process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(|key| std::env::var(key).ok())
    }

    pub fn from_env_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut conf = ExecutionConfig::default();
        for (env, name) in [
            (RUN_PARALLEL_ENV, RunParallel::NAME),
            (DUMP_PLANS_ENV, DumpPlans::NAME),
            (PROFILE_ENV, Profile::NAME),
        ] {
            if let Some(raw) = lookup(env) {
                let val = parse_env_bool(&raw).ok_or_else(|| {
                    DbError::invalid_input("Invalid boolean in environment variable")
                        .with_field("variable", env)
                        .with_field("value", &raw)
                })?;
                conf.set_from_scalar(name, val.into())?;
            }
        }
        Ok(conf)
    }

    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = setting_functions(name)?;
        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = setting_functions(name)?;
        Ok((func.get)(self))
    }

    /// Every setting, sorted by name.
    pub fn settings(&self) -> Vec<SettingEntry> {
        let mut entries: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, func)| SettingEntry {
                name: *name,
                description: func.description,
                value: (func.get)(self),
            })
            .collect();
        entries.sort_by_key(|e| e.name);
        entries
    }

    /// Reset a single setting to its default.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        let func = setting_functions(name)?;
        let scalar = (func.get)(&Self::default());
        (func.set)(scalar, self)
    }
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>,
    get: fn(conf: &ExecutionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: ExecutionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn setting_functions(name: &str) -> Result<&'static SettingFunctions> {
    GET_SET_FUNCTIONS
        .get(name)
        .ok_or_else(|| DbError::invalid_input(format!("Missing setting for '{name}'")))
}

fn insert_setting<S: ExecutionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<RunParallel>(&mut map);
    insert_setting::<DumpPlans>(&mut map);
    insert_setting::<Profile>(&mut map);

    map
});

pub trait ExecutionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>;
    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue;
}

fn scalar_as_bool(name: &str, scalar: &ScalarValue) -> Result<bool> {
    scalar.try_as_bool().ok_or_else(|| {
        DbError::invalid_input("Setting expects a boolean")
            .with_field("setting", name)
            .with_field("value", scalar)
    })
}

pub struct RunParallel;

impl ExecutionSetting for RunParallel {
    const NAME: &'static str = "run_parallel";
    const DESCRIPTION: &'static str = "Execute plans on the process group";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.run_parallel = scalar_as_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.run_parallel.into()
    }
}

pub struct DumpPlans;

impl ExecutionSetting for DumpPlans {
    const NAME: &'static str = "dump_plans";
    const DESCRIPTION: &'static str = "Log plans before and after optimization";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.dump_plans = scalar_as_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.dump_plans.into()
    }
}

pub struct Profile;

impl ExecutionSetting for Profile {
    const NAME: &'static str = "profile";
    const DESCRIPTION: &'static str = "Log timings of each execution step";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.profile = scalar_as_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.profile.into()
    }
}

#[cfg(test)]
mod tests {
    use lazydist_error::ErrorKind;

    use super::*;

    #[test]
    fn set_setting_exists() {
        let mut conf = ExecutionConfig::default();
        conf.set_from_scalar("run_parallel", true.into()).unwrap();

        let val = conf.get_as_scalar("run_parallel").unwrap();
        assert_eq!(ScalarValue::Boolean(true), val);
        assert!(conf.run_parallel);
    }

    #[test]
    fn set_setting_not_exists() {
        let mut conf = ExecutionConfig::default();
        conf.set_from_scalar("hello_world", true.into()).unwrap_err();
    }

    #[test]
    fn set_wrong_type() {
        let mut conf = ExecutionConfig::default();
        let err = conf.set_from_scalar("profile", "yes".into()).unwrap_err();
        assert_eq!(ErrorKind::InvalidInput, err.kind());
        assert!(!conf.profile);
    }

    #[test]
    fn reset_to_default() {
        let mut conf = ExecutionConfig {
            run_parallel: true,
            dump_plans: true,
            profile: true,
        };
        conf.reset("dump_plans").unwrap();
        assert_eq!(
            ExecutionConfig {
                run_parallel: true,
                dump_plans: false,
                profile: true,
            },
            conf
        );
    }

    #[test]
    fn from_env_vars() {
        let conf = ExecutionConfig::from_env_vars(|key| match key {
            RUN_PARALLEL_ENV => Some("1".to_string()),
            PROFILE_ENV => Some(" TRUE ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(
            ExecutionConfig {
                run_parallel: true,
                dump_plans: false,
                profile: true,
            },
            conf
        );
    }

    #[test]
    fn from_env_vars_invalid() {
        let err = ExecutionConfig::from_env_vars(|key| match key {
            DUMP_PLANS_ENV => Some("maybe".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(Some(DUMP_PLANS_ENV), err.field("variable"));
    }

    #[test]
    fn list_settings() {
        let conf = ExecutionConfig {
            profile: true,
            ..Default::default()
        };
        let settings = conf.settings();

        let names: Vec<_> = settings.iter().map(|s| s.name).collect();
        assert_eq!(vec!["dump_plans", "profile", "run_parallel"], names);
        assert_eq!(ScalarValue::Boolean(true), settings[1].value);
        assert_eq!("Log timings of each execution step", settings[1].description);
    }
}
