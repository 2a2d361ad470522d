use crate::error::{CloudError, Result};
use crate::hcl::{HclBody, HclValue, Literal, quote, sanitize_name};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;

const TERRAFORM_FILE: &str = "kubernetes.tf";
const REQUIRED_VERSION: &str = ">= 0.15.0";

/// Provider the generated document is written for
#[derive(Debug, Clone, PartialEq)]
pub struct TerraformProvider {
    /// Local provider name, e.g. `scaleway`
    pub name: String,
    /// Registry source, e.g. `scaleway/scaleway`
    pub source: String,
    /// Version constraint
    pub version: String,
    /// Arguments of the `provider` block
    pub arguments: BTreeMap<String, String>,
}

impl TerraformProvider {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            version: version.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
struct Document {
    resources: BTreeMap<String, BTreeMap<String, HclBody>>,
    outputs: BTreeMap<String, HclValue>,
}

/// Accumulates rendered resources and flushes them as one HCL2 document
#[derive(Debug)]
pub struct TerraformTarget {
    provider: TerraformProvider,
    document: Mutex<Document>,
}

impl TerraformTarget {
    pub fn new(provider: TerraformProvider) -> Self {
        Self {
            provider,
            document: Mutex::new(Document::default()),
        }
    }

    pub fn provider(&self) -> &TerraformProvider {
        &self.provider
    }

    /// Add `resource "<type>" "<name>"`. Returns a reference to its `id`.
    pub fn render_resource(
        &self,
        resource_type: &str,
        name: &str,
        body: HclBody,
    ) -> Result<Literal> {
        let tf_name = sanitize_name(name);
        let mut doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let by_name = doc.resources.entry(resource_type.to_string()).or_default();
        if by_name.contains_key(&tf_name) {
            return Err(CloudError::Conflict(format!(
                "terraform resource {}.{} rendered twice",
                resource_type, tf_name
            )));
        }
        by_name.insert(tf_name, body);
        tracing::trace!(resource_type, name, "Rendered terraform resource");
        Ok(Literal::property(resource_type, name, "id"))
    }

    /// Add a value to both `locals` and an `output` block.
    pub fn add_output(&self, name: &str, value: impl Into<HclValue>) -> Result<()> {
        let mut doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        if doc.outputs.contains_key(name) {
            return Err(CloudError::Conflict(format!("duplicate output {}", name)));
        }
        doc.outputs.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Append a value to a list output, creating it on first use.
    pub fn append_output(&self, name: &str, value: impl Into<HclValue>) -> Result<()> {
        let mut doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        match doc
            .outputs
            .entry(name.to_string())
            .or_insert_with(|| HclValue::List(Vec::new()))
        {
            HclValue::List(items) => {
                items.push(value.into());
                items.sort_by_key(sort_key);
                Ok(())
            }
            _ => Err(CloudError::Conflict(format!(
                "output {} is not a list",
                name
            ))),
        }
    }

    pub fn resource_count(&self) -> usize {
        let doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        doc.resources.values().map(BTreeMap::len).sum()
    }

    /// Produce the document: locals and outputs, the provider block, the
    /// resources sorted by type then name, and the `terraform` block.
    pub fn finish(&self) -> String {
        let doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        if !doc.outputs.is_empty() {
            let mut locals = HclBody::new();
            for (name, value) in &doc.outputs {
                locals = locals.attr(name, value.clone());
            }
            locals.write_block(&mut out, 0, "locals");
            out.push('\n');

            for name in doc.outputs.keys() {
                HclBody::new()
                    .attr("value", Literal::expression(format!("local.{}", name)))
                    .write_block(&mut out, 0, &format!("output {}", quote(name)));
                out.push('\n');
            }
        }

        let mut provider = HclBody::new();
        for (key, value) in &self.provider.arguments {
            provider = provider.attr(key, value);
        }
        provider.write_block(&mut out, 0, &format!("provider {}", quote(&self.provider.name)));
        out.push('\n');

        for (resource_type, resources) in &doc.resources {
            for (name, body) in resources {
                body.write_block(
                    &mut out,
                    0,
                    &format!("resource {} {}", quote(resource_type), quote(name)),
                );
                out.push('\n');
            }
        }

        out.push_str("terraform {\n");
        out.push_str(&format!("  required_version = {}\n", quote(REQUIRED_VERSION)));
        out.push_str("  required_providers {\n");
        HclBody::new()
            .attr("source", self.provider.source.as_str())
            .attr("version", self.provider.version.as_str())
            .write_object(&mut out, 4, &self.provider.name);
        out.push_str("  }\n");
        out.push_str("}\n");
        out
    }

    /// Write the document to `<dir>/kubernetes.tf`.
    pub async fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(TERRAFORM_FILE);
        fs::write(&path, self.finish()).await?;
        tracing::info!(path = %path.display(), "Wrote terraform document");
        Ok(path)
    }
}

fn sort_key(value: &HclValue) -> String {
    match value {
        HclValue::String(s) => s.clone(),
        HclValue::Literal(l) => l.as_str().to_string(),
        other => format!("{:?}", other),
    }
}
