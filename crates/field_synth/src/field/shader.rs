//! Per-field shader fragments and their composition into one translation unit.
//!
//! Every field contributes uniform declarations and one function per [`FunctionFamily`],
//! all named `<base><ordinal>`. [`ShaderComposer`] concatenates the fragments of a
//! generator's inputs, rejecting duplicate symbols and fragments that reference symbols no
//! other fragment declares (e.g. a transform field that is not part of the input set).
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::field::Ordinal;

/// Function families every field provides, in declaration order.
///
/// Later families may call earlier ones, so emitting family by family guarantees
/// declare-before-use across fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionFamily {
    PatientToTexture,
    Transform,
    Transfer,
    Sample,
}

impl FunctionFamily {
    pub const ALL: [FunctionFamily; 4] = [
        FunctionFamily::PatientToTexture,
        FunctionFamily::Transform,
        FunctionFamily::Transfer,
        FunctionFamily::Sample,
    ];

    pub fn base_name(self) -> &'static str {
        match self {
            FunctionFamily::PatientToTexture => "patientToTexture",
            FunctionFamily::Transform => "transformPoint",
            FunctionFamily::Transfer => "transferFunction",
            FunctionFamily::Sample => "sampleField",
        }
    }

    /// Entry point name for the field with `ordinal`.
    pub fn symbol(self, ordinal: Ordinal) -> String {
        ordinal.suffix(self.base_name())
    }
}

/// A `uniform <type> <name>;` declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformDecl {
    pub glsl_type: String,
    pub name: String,
}

impl UniformDecl {
    pub fn new(glsl_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            glsl_type: glsl_type.into(),
            name: name.into(),
        }
    }

    pub fn source(&self) -> String {
        format!("uniform {} {};", self.glsl_type, self.name)
    }
}

#[derive(Clone, Debug)]
struct FunctionDef {
    family: FunctionFamily,
    name: String,
    source: String,
}

/// The GLSL a single field contributes to a generator program.
#[derive(Clone, Debug)]
pub struct ShaderFragment {
    ordinal: Ordinal,
    uniforms: Vec<UniformDecl>,
    functions: Vec<FunctionDef>,
    requires: Vec<String>,
}

impl ShaderFragment {
    pub fn new(ordinal: Ordinal) -> Self {
        Self {
            ordinal,
            uniforms: Vec::new(),
            functions: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    /// Declares `uniform <glsl_type> <base><ordinal>;`.
    pub fn uniform(mut self, glsl_type: &str, base: &str) -> Self {
        self.declare_uniform(glsl_type, base);
        self
    }

    pub fn declare_uniform(&mut self, glsl_type: &str, base: &str) {
        let name = self.ordinal.suffix(base);
        if !self.uniforms.iter().any(|u| u.name == name) {
            self.uniforms.push(UniformDecl::new(glsl_type, name));
        }
    }

    /// Sets the body of `family`, replacing any previous definition.
    ///
    /// `source` is the complete function definition, named [`FunctionFamily::symbol`].
    pub fn function(mut self, family: FunctionFamily, source: impl Into<String>) -> Self {
        self.set_function(family, source);
        self
    }

    pub fn set_function(&mut self, family: FunctionFamily, source: impl Into<String>) {
        let def = FunctionDef {
            family,
            name: family.symbol(self.ordinal),
            source: source.into(),
        };
        match self.functions.iter_mut().find(|f| f.family == family) {
            Some(existing) => *existing = def,
            None => self.functions.push(def),
        }
    }

    /// Records a symbol this fragment references but does not declare.
    pub fn requires(mut self, symbol: impl Into<String>) -> Self {
        self.requires.push(symbol.into());
        self
    }

    pub fn uniforms(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    pub fn required(&self) -> &[String] {
        &self.requires
    }

    pub fn has_function(&self, family: FunctionFamily) -> bool {
        self.functions.iter().any(|f| f.family == family)
    }

    pub fn function_source(&self, family: FunctionFamily) -> Option<&str> {
        self.functions
            .iter()
            .find(|f| f.family == family)
            .map(|f| f.source.as_str())
    }

    /// Every symbol this fragment declares.
    pub fn declared_symbols(&self) -> impl Iterator<Item = &str> {
        self.uniforms
            .iter()
            .map(|u| u.name.as_str())
            .chain(self.functions.iter().map(|f| f.name.as_str()))
    }
}

/// Combines field fragments and generator-owned uniforms into GLSL source.
#[derive(Default)]
pub struct ShaderComposer {
    fragments: Vec<ShaderFragment>,
    uniforms: Vec<UniformDecl>,
    requires: Vec<String>,
}

impl ShaderComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ShaderFragment) -> &mut Self {
        self.fragments.push(fragment);
        self
    }

    /// Adds a uniform owned by the generator rather than by a field.
    pub fn provide_uniform(&mut self, decl: UniformDecl) -> &mut Self {
        self.uniforms.push(decl);
        self
    }

    /// Records a symbol the generator's own code references.
    pub fn require(&mut self, symbol: impl Into<String>) -> &mut Self {
        self.requires.push(symbol.into());
        self
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Uniform declarations followed by the functions of each family, field by field.
    pub fn compose(&self) -> Result<String> {
        let mut owners: HashMap<&str, String> = HashMap::new();
        for decl in &self.uniforms {
            if owners.insert(&decl.name, "the generator".into()).is_some() {
                return Err(Error::Composition(format!(
                    "generator declares '{}' twice",
                    decl.name
                )));
            }
        }
        for fragment in &self.fragments {
            let owner = format!("field {}", fragment.ordinal);
            for symbol in fragment.declared_symbols() {
                if let Some(previous) = owners.insert(symbol, owner.clone()) {
                    return Err(Error::Composition(format!(
                        "'{}' is declared by {} and {}",
                        symbol, previous, owner
                    )));
                }
            }
        }

        for fragment in &self.fragments {
            for symbol in &fragment.requires {
                if !owners.contains_key(symbol.as_str()) {
                    return Err(Error::Composition(format!(
                        "field {} references '{}', which no input declares",
                        fragment.ordinal, symbol
                    )));
                }
            }
        }
        for symbol in &self.requires {
            if !owners.contains_key(symbol.as_str()) {
                return Err(Error::Composition(format!(
                    "program references '{}', which no input declares",
                    symbol
                )));
            }
        }

        let mut source = String::new();
        for decl in self
            .uniforms
            .iter()
            .chain(self.fragments.iter().flat_map(|f| f.uniforms.iter()))
        {
            source.push_str(&decl.source());
            source.push('\n');
        }
        for family in FunctionFamily::ALL {
            for fragment in &self.fragments {
                if let Some(body) = fragment.function_source(family) {
                    source.push_str(body.trim_end());
                    source.push('\n');
                }
            }
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(n: u32) -> ShaderFragment {
        let ordinal = Ordinal(n);
        ShaderFragment::new(ordinal)
            .uniform("vec4", "rgba")
            .function(
                FunctionFamily::Transform,
                format!(
                    "vec3 {}(const in vec3 p)\n{{\n  return p;\n}}",
                    FunctionFamily::Transform.symbol(ordinal)
                ),
            )
    }

    #[test]
    fn composes_family_by_family() {
        let mut composer = ShaderComposer::new();
        composer.push(fragment(0)).push(fragment(1));
        let source = composer.compose().unwrap();
        let uniform = source.find("uniform vec4 rgba1;").unwrap();
        let function = source.find("vec3 transformPoint0").unwrap();
        assert!(uniform < function);
        assert!(source.find("transformPoint0").unwrap() < source.find("transformPoint1").unwrap());
    }

    #[test]
    fn duplicate_ordinals_collide() {
        let mut composer = ShaderComposer::new();
        composer.push(fragment(2)).push(fragment(2));
        let err = composer.compose().unwrap_err();
        assert!(err.to_string().contains("rgba2"), "{err}");
    }

    #[test]
    fn missing_requirement_is_rejected() {
        let mut composer = ShaderComposer::new();
        composer.push(fragment(0).requires("textureUnit7"));
        assert!(matches!(composer.compose(), Err(Error::Composition(_))));
    }

    #[test]
    fn set_function_replaces_the_family_body() {
        let mut f = fragment(3);
        f.set_function(
            FunctionFamily::Transform,
            "vec3 transformPoint3(const in vec3 p) { return -p; }",
        );
        assert!(f.function_source(FunctionFamily::Transform).unwrap().contains("-p"));
        assert_eq!(f.declared_symbols().filter(|s| *s == "transformPoint3").count(), 1);
    }
}
