//! Puppet bootstrap
//!
//! Custom facts shipped in Puppet modules expect Puppet's settings to be
//! loaded and its plugin directory to be on `$LOAD_PATH`.

use crate::error::RuntimeError;
use crate::runtime::Runtime;

/// Loaded into the runtime before custom facts are searched
pub const FRAMEWORK_BOOTSTRAP: &str = r#"require 'puppet'
Puppet.initialize_settings
$LOAD_PATH << Puppet[:libdir] unless $LOAD_PATH.include?(Puppet[:libdir])
Facter.reset
Facter.search_external([Puppet[:pluginfactdest]])
if Puppet.respond_to? :initialize_facts
  Puppet.initialize_facts
else
  Facter.add(:puppetversion) do
    setcode { Puppet.version.to_s }
  end
end
"#;

/// Initialize Puppet inside the runtime
pub fn initialize_framework(runtime: &dyn Runtime) -> Result<(), RuntimeError> {
    tracing::debug!("initializing puppet");
    runtime.eval(FRAMEWORK_BOOTSTRAP)?;
    Ok(())
}
