//! Component registry.
//!
//! Maps `(module, class)` names from the configuration to factories that
//! build components. Populated explicitly at startup and passed to the
//! supervisor by value; nothing is discovered through global state.
//!
//! Factories are closures, so collaborators a component needs (a shared
//! hardware handle, a simulated device) are captured at registration time:
//!
//! ```rust,ignore
//! let servo = Arc::new(ServoDriver::open("/dev/i2c-1")?);
//! registry.register("steering", "Steering", move |args: SteeringArgs, ports| {
//!     Ok(Steering::new(args, ports, Arc::clone(&servo)))
//! });
//! ```

use crate::component::{Component, ComponentError, Ports};
use crate::config::ComponentSpec;
use crate::error::{CarError, CarResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed component arguments.
///
/// `validate` runs when the car is constructed, so bad values are
/// reported before anything starts.
pub trait ComponentArgs: DeserializeOwned {
    /// Check semantic constraints serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Arguments of a component that takes none.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

impl ComponentArgs for NoArgs {}

type ValidateFn = Box<dyn Fn(&toml::Table) -> Result<(), String> + Send + Sync>;
type BuildFn =
    Box<dyn Fn(&toml::Table, Ports) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync>;

struct ClassEntry {
    class: String,
    validate: ValidateFn,
    build: BuildFn,
}

/// Registry of component factories, grouped by module.
pub struct ComponentRegistry {
    modules: BTreeMap<String, Vec<ClassEntry>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in components.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::components::register_builtins(&mut registry);
        registry
    }

    /// Register `module.class`, built by `factory` from typed arguments.
    ///
    /// # Panics
    /// Panics if `module.class` is already registered.
    pub fn register<A, C, F>(&mut self, module: &str, class: &str, factory: F)
    where
        A: ComponentArgs + 'static,
        C: Component + 'static,
        F: Fn(A, Ports) -> Result<C, ComponentError> + Send + Sync + 'static,
    {
        let classes = self.modules.entry(module.to_string()).or_default();
        if classes.iter().any(|e| e.class == class) {
            panic!("Component '{module}.{class}' is already registered");
        }
        classes.push(ClassEntry {
            class: class.to_string(),
            validate: Box::new(|args: &toml::Table| decode::<A>(args)?.validate()),
            build: Box::new(move |args: &toml::Table, ports: Ports| {
                let args = decode::<A>(args).map_err(ComponentError::InvalidArgs)?;
                let component = factory(args, ports)?;
                Ok(Arc::new(component) as Arc<dyn Component>)
            }),
        });
    }

    /// Classes of `module`, in registration order.
    pub fn classes(&self, module: &str) -> Option<Vec<&str>> {
        self.modules
            .get(module)
            .map(|classes| classes.iter().map(|e| e.class.as_str()).collect())
    }

    /// Every module with its classes, sorted by module name.
    pub fn modules(&self) -> Vec<(&str, Vec<&str>)> {
        self.modules
            .iter()
            .map(|(module, classes)| {
                (
                    module.as_str(),
                    classes.iter().map(|e| e.class.as_str()).collect(),
                )
            })
            .collect()
    }

    /// Resolve one `components.<module>` entry into component specs.
    ///
    /// - Single-class module: the table holds the arguments directly (or,
    ///   alternatively, under a single key named after the class).
    /// - Multi-class module: the table must be keyed by class names; each
    ///   key instantiates that class with its own arguments. A nested table
    ///   under any other key is an unknown class; an entry naming no class
    ///   at all is ambiguous.
    ///
    /// # Errors
    /// `UnknownModule`, `UnknownClass`, `AmbiguousModule`, `InvalidArgs`
    /// (entry is not a table) or `MalformedChannels`.
    pub fn resolve(&self, module: &str, entry: &toml::Value) -> CarResult<Vec<ComponentSpec>> {
        let classes = self
            .modules
            .get(module)
            .ok_or_else(|| CarError::UnknownModule {
                module: module.to_string(),
            })?;
        let table = as_table(module, entry)?;

        if let [only] = classes.as_slice() {
            let args = match table.get(&only.class) {
                Some(toml::Value::Table(nested)) if table.len() == 1 => nested.clone(),
                _ => table.clone(),
            };
            return Ok(vec![ComponentSpec::from_table(module, &only.class, args)?]);
        }

        let is_class = |key: &str| classes.iter().any(|e| e.class == key);
        if let Some(key) = table
            .iter()
            .find(|(key, args)| args.is_table() && !is_class(key.as_str()))
            .map(|(key, _)| key)
        {
            return Err(unknown_class(module, key, classes));
        }
        if !table.keys().any(|key| is_class(key.as_str())) {
            return Err(CarError::AmbiguousModule {
                module: module.to_string(),
                classes: join(classes.iter().map(|e| e.class.as_str())),
            });
        }

        table
            .iter()
            .map(|(class, args)| {
                if !is_class(class.as_str()) {
                    return Err(unknown_class(module, class, classes));
                }
                ComponentSpec::from_table(module, class, as_table(class, args)?.clone())
            })
            .collect()
    }

    /// Check `spec.args` against the class's argument type.
    ///
    /// # Errors
    /// [`CarError::InvalidArgs`] with the deserialization or validation message.
    pub fn validate(&self, spec: &ComponentSpec) -> CarResult<()> {
        let entry = self.entry(&spec.module, &spec.class)?;
        (entry.validate)(&spec.args).map_err(|reason| CarError::InvalidArgs {
            component: spec.name().to_string(),
            reason,
        })
    }

    /// Instantiate the component described by `spec`.
    ///
    /// # Errors
    /// [`CarError::InvalidArgs`] for rejected arguments,
    /// [`CarError::StartFailed`] when the factory itself fails.
    pub fn build(&self, spec: &ComponentSpec) -> CarResult<Arc<dyn Component>> {
        let entry = self.entry(&spec.module, &spec.class)?;
        let ports = Ports::new(
            spec.name(),
            spec.subscription.clone(),
            spec.publication.clone(),
        );
        (entry.build)(&spec.args, ports).map_err(|e| match e {
            ComponentError::InvalidArgs(reason) => CarError::InvalidArgs {
                component: spec.name().to_string(),
                reason,
            },
            source => CarError::StartFailed {
                component: spec.name().to_string(),
                source,
            },
        })
    }

    fn entry(&self, module: &str, class: &str) -> CarResult<&ClassEntry> {
        let classes = self
            .modules
            .get(module)
            .ok_or_else(|| CarError::UnknownModule {
                module: module.to_string(),
            })?;
        classes
            .iter()
            .find(|e| e.class == class)
            .ok_or_else(|| unknown_class(module, class, classes))
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<A: DeserializeOwned>(args: &toml::Table) -> Result<A, String> {
    toml::Value::Table(args.clone())
        .try_into::<A>()
        .map_err(|e| e.to_string())
}

fn unknown_class(module: &str, class: &str, classes: &[ClassEntry]) -> CarError {
    CarError::UnknownClass {
        module: module.to_string(),
        class: class.to_string(),
        available: join(classes.iter().map(|e| e.class.as_str())),
    }
}

fn as_table<'a>(component: &str, value: &'a toml::Value) -> CarResult<&'a toml::Table> {
    value.as_table().ok_or_else(|| CarError::InvalidArgs {
        component: component.to_string(),
        reason: format!("expected a table of arguments, found {}", value.type_str()),
    })
}

fn join<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        ports: Ports,
        gain: f64,
    }

    impl Component for Stub {
        fn ports(&self) -> &Ports {
            &self.ports
        }
        fn start(&self) -> Result<bool, ComponentError> {
            Ok(false)
        }
        fn shutdown(&self) -> Result<(), ComponentError> {
            Ok(())
        }
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct StubArgs {
        #[serde(default = "unit_gain")]
        gain: f64,
    }

    fn unit_gain() -> f64 {
        1.0
    }

    impl ComponentArgs for StubArgs {
        fn validate(&self) -> Result<(), String> {
            if self.gain <= 0.0 {
                return Err(format!("gain must be positive, got {}", self.gain));
            }
            Ok(())
        }
    }

    fn stub(args: StubArgs, ports: Ports) -> Result<Stub, ComponentError> {
        Ok(Stub {
            ports,
            gain: args.gain,
        })
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register("stub", "Stub", stub);
        registry.register("pair", "Left", |_: NoArgs, ports| {
            Ok(Stub { ports, gain: 1.0 })
        });
        registry.register("pair", "Right", |_: NoArgs, ports| {
            Ok(Stub { ports, gain: 2.0 })
        });
        registry
    }

    fn value(text: &str) -> toml::Value {
        toml::Value::Table(toml::from_str(text).unwrap())
    }

    #[test]
    fn single_class_module_takes_args_directly() {
        let specs = registry()
            .resolve("stub", &value("gain = 2.5\npublication = \"x\""))
            .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].class, "Stub");
        assert_eq!(specs[0].publication, ["x"]);
        assert!(specs[0].args.contains_key("gain"));
    }

    #[test]
    fn single_class_module_accepts_class_key() {
        let specs = registry()
            .resolve("stub", &value("[Stub]\ngain = 3.0"))
            .unwrap();
        assert_eq!(specs[0].args.get("gain").and_then(|v| v.as_float()), Some(3.0));
    }

    #[test]
    fn multi_class_module_requires_class_keys() {
        let reg = registry();
        let err = reg.resolve("pair", &value("")).unwrap_err();
        assert!(matches!(err, CarError::AmbiguousModule { .. }));
        assert!(err.to_string().contains("Left, Right"));

        let specs = reg
            .resolve("pair", &value("[Right]\n[Left]\nsubscription = \"a\""))
            .unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["Right", "Left"]);
        assert_eq!(specs[1].subscription, ["a"]);
    }

    #[test]
    fn multi_class_module_rejects_unknown_class() {
        let err = registry()
            .resolve("pair", &value("[Left]\n[Middle]"))
            .unwrap_err();
        assert!(matches!(err, CarError::UnknownClass { ref class, .. } if class == "Middle"));

        // A lone misspelled class is still an unknown class, not ambiguity.
        let err = registry().resolve("pair", &value("[Midle]")).unwrap_err();
        assert!(matches!(err, CarError::UnknownClass { ref class, .. } if class == "Midle"));

        let err = registry().resolve("pair", &value("gain = 2.0")).unwrap_err();
        assert!(matches!(err, CarError::AmbiguousModule { .. }));
    }

    #[test]
    fn unknown_module_and_non_table_entry() {
        let reg = registry();
        assert!(matches!(
            reg.resolve("lidar", &value("")),
            Err(CarError::UnknownModule { .. })
        ));
        assert!(matches!(
            reg.resolve("stub", &toml::Value::Integer(1)),
            Err(CarError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn validation_checks_types_and_semantics() {
        let reg = registry();
        let check = |text: &str| {
            let spec = reg.resolve("stub", &value(text)).unwrap().remove(0);
            reg.validate(&spec)
        };
        assert!(check("gain = 0.5").is_ok());
        assert!(check("").is_ok());
        assert!(matches!(check("gain = -1.0"), Err(CarError::InvalidArgs { .. })));
        assert!(matches!(check("gain = \"high\""), Err(CarError::InvalidArgs { .. })));
        assert!(matches!(check("bogus = 1"), Err(CarError::InvalidArgs { .. })));
    }

    #[test]
    fn build_wires_ports_from_spec() {
        let reg = registry();
        let spec = reg
            .resolve("stub", &value("subscription = [\"a\", \"b\"]\npublication = \"c\""))
            .unwrap()
            .remove(0);
        let component = reg.build(&spec).unwrap();
        assert_eq!(component.name(), "Stub");
        assert_eq!(component.ports().subscription(), ["a", "b"]);
        assert_eq!(component.ports().publication(), ["c"]);
        assert!(component.ports().bus().is_none());
    }

    #[test]
    fn factory_failure_is_a_start_failure() {
        let mut reg = ComponentRegistry::new();
        reg.register("camera", "Camera", |_: NoArgs, _| -> Result<Stub, ComponentError> {
            Err(ComponentError::Device("no /dev/video0".to_string()))
        });
        let spec = reg.resolve("camera", &value("")).unwrap().remove(0);
        assert!(matches!(
            reg.build(&spec),
            Err(CarError::StartFailed { ref component, .. }) if component == "Camera"
        ));
    }

    #[test]
    fn listing_is_sorted_by_module() {
        let reg = registry();
        let modules = reg.modules();
        assert_eq!(modules[0], ("pair", vec!["Left", "Right"]));
        assert_eq!(modules[1], ("stub", vec!["Stub"]));
        assert_eq!(reg.classes("pair").unwrap(), ["Left", "Right"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut reg = registry();
        reg.register("stub", "Stub", stub);
    }

    #[test]
    fn built_stub_keeps_args() {
        let reg = registry();
        let spec = reg.resolve("stub", &value("gain = 4.0")).unwrap().remove(0);
        let built = reg.build(&spec).unwrap();
        assert_eq!(built.name(), "Stub");
        let direct = stub(StubArgs { gain: 4.0 }, Ports::detached("p")).unwrap();
        assert_eq!(direct.gain, 4.0);
    }
}
