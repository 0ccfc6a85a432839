//! Target and method identity.
//!
//! A [`Locator`] names the remote business object an invocation is aimed at;
//! a [`MethodDescriptor`] names the view method being invoked. Both are
//! immutable once constructed and are shared freely between threads.

use core::fmt;

/// Immutable descriptor of an invocation target.
///
/// The `application/module/name` triple identifies a deployed object; `view`
/// names the client-visible interface the proxy was created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    application: String,
    module: String,
    name: String,
    view: String,
}

impl Locator {
    /// Create a locator for the given target.
    pub fn new(
        application: impl Into<String>,
        module: impl Into<String>,
        name: impl Into<String>,
        view: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            module: module.into(),
            name: name.into(),
            view: view.into(),
        }
    }

    /// The application the target is deployed in.
    pub fn application(&self) -> &str {
        &self.application
    }

    /// The module within the application.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The target object's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client-visible view the proxy exposes.
    pub fn view(&self) -> &str {
        &self.view
    }

    /// The `application/module/name` registration path.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.application, self.module, self.name)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.application, self.module, self.name, self.view
        )
    }
}

/// Immutable descriptor of the invoked method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodDescriptor {
    /// Create a descriptor for `name` taking the given parameter types.
    pub fn new<I, S>(name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }

    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter type names, in declaration order.
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, ty) in self.parameter_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(ty)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_path_and_display() {
        let locator = Locator::new("shop", "orders", "OrderService", "OrderView");
        assert_eq!(locator.path(), "shop/orders/OrderService");
        assert_eq!(locator.to_string(), "shop/orders/OrderService:OrderView");
    }

    #[test]
    fn method_display_lists_parameters() {
        let method = MethodDescriptor::new("greet", ["String"]);
        assert_eq!(method.to_string(), "greet(String)");
        assert_eq!(method.arity(), 1);

        let nullary = MethodDescriptor::new("ping", Vec::<String>::new());
        assert_eq!(nullary.to_string(), "ping()");
    }
}
