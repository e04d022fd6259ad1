//! The durable table of known modules and their advertised capabilities.

use std::collections::{ BTreeMap, HashMap };
use std::collections::hash_map::Entry ;
use std::sync::{ Arc, Mutex, PoisonError, RwLock };
use thiserror::Error ;
use tracing::{ debug, warn };

use crate::{ Capability, EntryPoints, Module, ModuleManifest };
use crate::config::ConfigError ;



/// Coarse startup phase of the loader.
#[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash )]
pub enum Runlevel {
	/// Compiled-in units are registering; nothing has been loaded yet.
	Embedding,
	/// Startup loading is in progress; reload requests are queued.
	Loading,
	/// Steady state; reload requests execute immediately.
	Normal,
}

/// Errors that reject a registration or a manifest entry.
#[derive( Error, Debug, Clone, PartialEq, Eq )]
pub enum RegisterError {
	#[error( "Module '{0}' presented no identity key" )] MissingKey( String ),
	#[error( "Module '{0}' failed identity key verification" )] KeyRejected( String ),
	#[error( "Module '{0}' was built with incompatible build options" )] BuildOptionsMismatch( String ),
	#[error( "Module '{0}' is not known to the registry" )] UnknownModule( String ),
	#[error( "Module '{0}' checksum does not match its manifest" )] ChecksumMismatch( String ),
	#[error( "Module '{0}' registered outside of a load" )] NoLoadInProgress( String ),
	#[error( "Module '{0}' is already registered" )] AlreadyRegistered( String ),
}

/// Decides whether a unit's identity key is acceptable.
pub trait KeyVerifier: Send + Sync {
	fn verify( &self, name: &str, key: &str ) -> bool ;
}

impl<F> KeyVerifier for F where F: Fn( &str, &str ) -> bool + Send + Sync {
	fn verify( &self, name: &str, key: &str ) -> bool { self( name, key ) }
}

/// Accepts exactly the keys whose BLAKE3 digest equals the expected one.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct DigestVerifier {
	expected: blake3::Hash,
}

impl DigestVerifier {

	#[inline] pub fn new( expected: blake3::Hash ) -> Self { Self { expected }}

	/// A verifier accepting `key` itself.
	pub fn for_key( key: &str ) -> Self { Self::new( blake3::hash( key.as_bytes() )) }

	pub fn from_hex( digest: &str ) -> Result<Self, ConfigError> {
		let bytes = hex::decode( digest.trim() )?;
		let bytes: [u8; blake3::OUT_LEN] = bytes.as_slice()
			.try_into()
			.map_err(| _ | ConfigError::DigestLength( bytes.len() ))?;
		Ok( Self::new( blake3::Hash::from( bytes )))
	}

}

impl KeyVerifier for DigestVerifier {
	fn verify( &self, name: &str, key: &str ) -> bool {
		let digest = blake3::hash( key.as_bytes() );
		if digest == self.expected { return true }
		debug!( module = %name, signature = %hex::encode( digest.as_bytes() ), "Unexpected module signature" );
		false
	}
}

/// What a unit presents when it registers itself.
#[derive( Debug, Clone )]
pub struct Registration {
	name: String,
	checksum: String,
	description: String,
	key: Option<String>,
	build_options_sum: String,
	entry: EntryPoints,
}

impl Registration {

	pub fn new( name: impl Into<String>, checksum: impl Into<String>, entry: EntryPoints ) -> Self {
		Self {
			name: name.into(),
			checksum: checksum.into(),
			description: String::new(),
			key: None,
			build_options_sum: String::new(),
			entry,
		}
	}

	pub fn with_key( mut self, key: impl Into<String> ) -> Self {
		self.key = Some( key.into() );
		self
	}

	pub fn with_build_options( mut self, sum: impl Into<String> ) -> Self {
		self.build_options_sum = sum.into();
		self
	}

	pub fn with_description( mut self, description: impl Into<String> ) -> Self {
		self.description = description.into();
		self
	}

	#[inline] pub fn name( &self ) -> &str { &self.name }
	#[inline] pub fn checksum( &self ) -> &str { &self.checksum }

}

/// All known modules, by name and by provided capability.
///
/// Modules are added while the registry is seeded and never removed, so
/// [`Registry::find`] keeps returning a module no matter how many load
/// cycles it goes through.
pub struct Registry {
	modules: RwLock<BTreeMap<String, Arc<Module>>>,
	providers: RwLock<HashMap<Capability, Arc<Module>>>,
	embedded: Mutex<Vec<Registration>>,
	runlevel: RwLock<Runlevel>,
	verifier: Option<Box<dyn KeyVerifier>>,
	build_options_sum: String,
}

impl std::fmt::Debug for Registry {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "Registry" )
			.field( "modules", &self.modules.read().unwrap_or_else( PoisonError::into_inner ).keys() )
			.field( "runlevel", &self.runlevel() )
			.field( "verifier", &self.verifier.as_ref().map(| _ | "<verifier>" ))
			.finish_non_exhaustive()
	}
}

impl Default for Registry {
	fn default() -> Self { Self::new( None, String::new() ) }
}

impl Registry {

	pub fn new( verifier: Option<Box<dyn KeyVerifier>>, build_options_sum: impl Into<String> ) -> Self {
		Self {
			modules: RwLock::new( BTreeMap::new() ),
			providers: RwLock::new( HashMap::new() ),
			embedded: Mutex::new( Vec::with_capacity( 0 )),
			runlevel: RwLock::new( Runlevel::Embedding ),
			verifier,
			build_options_sum: build_options_sum.into(),
		}
	}

	pub fn runlevel( &self ) -> Runlevel {
		*self.runlevel.read().unwrap_or_else( PoisonError::into_inner )
	}

	pub(crate) fn set_runlevel( &self, runlevel: Runlevel ) {
		*self.runlevel.write().unwrap_or_else( PoisonError::into_inner ) = runlevel ;
	}

	pub fn find( &self, name: &str ) -> Option<Arc<Module>> {
		self.modules.read().unwrap_or_else( PoisonError::into_inner ).get( name ).cloned()
	}

	pub fn find_provider( &self, kind: &str, id: &str ) -> Option<Arc<Module>> {
		self.providers.read()
			.unwrap_or_else( PoisonError::into_inner )
			.get( &Capability::new( kind, id ))
			.cloned()
	}

	/// Every known module, ordered by name.
	pub fn modules( &self ) -> Vec<Arc<Module>> {
		self.modules.read().unwrap_or_else( PoisonError::into_inner ).values().cloned().collect()
	}

	/// Adds a module described by a build manifest.
	///
	/// The module provides `("module", name)` plus whatever the manifest
	/// lists. When two modules provide the same capability the first one
	/// keeps it.
	pub fn insert( &self, manifest: ModuleManifest ) -> Result<Arc<Module>, RegisterError> {
		let mut modules = self.modules.write().unwrap_or_else( PoisonError::into_inner );
		if modules.contains_key( &manifest.name ) {
			return Err( RegisterError::AlreadyRegistered( manifest.name ));
		}
		let module = Arc::new( Module::from_manifest( manifest ));
		modules.insert( module.name().to_string(), Arc::clone( &module ));
		drop( modules );

		let mut providers = self.providers.write().unwrap_or_else( PoisonError::into_inner );
		let capabilities = std::iter::once( Capability::module( module.name() ))
			.chain( module.provides().iter().cloned() );
		for capability in capabilities {
			match providers.entry( capability ) {
				Entry::Occupied( existing ) => warn!(
					module = %module.name(), provider = %existing.get().name(), capability = %existing.key(),
					"Capability already provided, keeping existing provider"
				),
				Entry::Vacant( slot ) => { slot.insert( Arc::clone( &module )); },
			}
		}

		Ok( module )
	}

	/// Registers a unit's entry points.
	///
	/// A unit registers while it is being loaded, and its entry points are
	/// attached to that load cycle. Compiled-in units register during
	/// [`Runlevel::Embedding`], before any manifest is known; their
	/// registration is kept until startup matches it against the manifests
	/// and `None` is returned.
	///
	/// # Errors
	/// Rejected when the identity key does not verify, when the build options
	/// differ from the host's, or when the checksum disagrees with the manifest.
	pub fn register( &self, registration: Registration ) -> Result<Option<Arc<Module>>, RegisterError> {
		self.register_inner( registration )
			.inspect_err(| err | warn!( %err, "Module registration rejected" ))
	}

	fn register_inner( &self, registration: Registration ) -> Result<Option<Arc<Module>>, RegisterError> {

		self.verify_identity( &registration )?;

		let existing = self.find( &registration.name );
		if let Some(( module, proxy )) = existing.as_ref().and_then(| module | module.proxy().map(| proxy | ( module, proxy ))) {
			if registration.checksum != module.checksum() {
				warn!( module = %module.name(), "Module may fail to load due to unknown dependencies" );
				return Err( RegisterError::ChecksumMismatch( registration.name ));
			}
			return match proxy.lib().attach( registration.entry ) {
				true => {
					if !registration.description.is_empty() { module.set_description( registration.description ) }
					Ok( Some( Arc::clone( module )))
				},
				false => Err( RegisterError::AlreadyRegistered( registration.name )),
			};
		}

		match ( self.runlevel(), existing ) {
			( Runlevel::Embedding, _ ) => {
				debug!( module = %registration.name, "Embedded module registered" );
				self.embedded.lock().unwrap_or_else( PoisonError::into_inner ).push( registration );
				Ok( None )
			},
			( _, None ) => Err( RegisterError::UnknownModule( registration.name )),
			( _, Some( _ )) => Err( RegisterError::NoLoadInProgress( registration.name )),
		}

	}

	fn verify_identity( &self, registration: &Registration ) -> Result<(), RegisterError> {
		if let Some( verifier ) = &self.verifier {
			let key = registration.key.as_deref()
				.ok_or_else(|| RegisterError::MissingKey( registration.name.clone() ))?;
			if !verifier.verify( &registration.name, key ) {
				return Err( RegisterError::KeyRejected( registration.name.clone() ));
			}
		}
		if !registration.build_options_sum.is_empty() && registration.build_options_sum != self.build_options_sum {
			return Err( RegisterError::BuildOptionsMismatch( registration.name.clone() ));
		}
		Ok(())
	}

	/// Matches the registrations collected during [`Runlevel::Embedding`]
	/// against the manifests. Embedded units without a manifest become
	/// modules of their own. Rejected registrations are returned.
	pub(crate) fn reregister_embedded( &self ) -> Vec<RegisterError> {
		let embedded = std::mem::take( &mut *self.embedded.lock().unwrap_or_else( PoisonError::into_inner ));
		embedded.into_iter()
			.filter_map(| registration | self.reregister( registration ).err() )
			.collect()
	}

	fn reregister( &self, registration: Registration ) -> Result<(), RegisterError> {
		let Registration { name, checksum, description, entry, .. } = registration ;
		let module = match self.find( &name ) {
			Some( module ) if module.checksum() != checksum => {
				warn!( module = %name, "Embedded module checksum does not match its manifest" );
				return Err( RegisterError::ChecksumMismatch( name ));
			},
			Some( module ) => {
				if !description.is_empty() { module.set_description( description ) }
				module
			},
			None => self.insert( ModuleManifest::new( name.clone(), checksum ).with_description( description ))?,
		};
		match module.set_embedded( entry ) {
			true => Ok(()),
			false => Err( RegisterError::AlreadyRegistered( name )),
		}
	}

}

#[cfg( test )]
mod tests {

	use super::* ;

	#[test]
	fn digest_verifier_accepts_only_its_key() {
		let verifier = DigestVerifier::for_key( "this is the license key" );
		assert!( verifier.verify( "chan-sip", "this is the license key" ));
		assert!( !verifier.verify( "chan-sip", "some other key" ));
	}

	#[test]
	fn digest_verifier_round_trips_hex() {
		let expected = blake3::hash( b"key" );
		let verifier = DigestVerifier::from_hex( &hex::encode( expected.as_bytes() )).unwrap();
		assert_eq!( verifier, DigestVerifier::new( expected ));
	}

	#[test]
	fn insert_registers_implicit_module_capability() {
		let registry = Registry::default();
		registry.insert( ModuleManifest::new( "codec-g711", "c1" ).providing( "codec", "g711" )).unwrap();
		assert_eq!( registry.find_provider( "module", "codec-g711" ).map(| m | m.name().to_string() ), Some( "codec-g711".to_string() ));
		assert_eq!( registry.find_provider( "codec", "g711" ).map(| m | m.name().to_string() ), Some( "codec-g711".to_string() ));
		assert!( registry.find_provider( "codec", "ulaw" ).is_none() );
	}

	#[test]
	fn insert_rejects_duplicates() {
		let registry = Registry::default();
		registry.insert( ModuleManifest::new( "chan-sip", "a" )).unwrap();
		assert_eq!(
			registry.insert( ModuleManifest::new( "chan-sip", "b" )).unwrap_err(),
			RegisterError::AlreadyRegistered( "chan-sip".to_string() ),
		);
	}

	#[test]
	fn first_provider_keeps_capability() {
		let registry = Registry::default();
		registry.insert( ModuleManifest::new( "codec-a", "a" ).providing( "codec", "g711" )).unwrap();
		registry.insert( ModuleManifest::new( "codec-b", "b" ).providing( "codec", "g711" )).unwrap();
		assert_eq!( registry.find_provider( "codec", "g711" ).unwrap().name(), "codec-a" );
	}

	#[test]
	fn register_checks_key_before_anything_else() {
		let registry = Registry::new( Some( Box::new( DigestVerifier::for_key( "key" ))), "sum" );
		assert_eq!(
			registry.register( Registration::new( "chan-sip", "c", EntryPoints::new() )).unwrap_err(),
			RegisterError::MissingKey( "chan-sip".to_string() ),
		);
		assert_eq!(
			registry.register( Registration::new( "chan-sip", "c", EntryPoints::new() ).with_key( "nope" )).unwrap_err(),
			RegisterError::KeyRejected( "chan-sip".to_string() ),
		);
		assert_eq!(
			registry.register( Registration::new( "chan-sip", "c", EntryPoints::new() ).with_key( "key" ).with_build_options( "other" )).unwrap_err(),
			RegisterError::BuildOptionsMismatch( "chan-sip".to_string() ),
		);
	}

	#[test]
	fn register_defers_while_embedding() {
		let registry = Registry::default();
		assert!( registry.register( Registration::new( "res-timing", "t", EntryPoints::new() )).unwrap().is_none() );
		assert!( registry.reregister_embedded().is_empty() );
		assert!( registry.find( "res-timing" ).unwrap().is_embedded() );
	}

	#[test]
	fn reregister_rejects_stale_embedded_checksum() {
		let registry = Registry::default();
		registry.register( Registration::new( "res-timing", "old", EntryPoints::new() )).unwrap();
		registry.insert( ModuleManifest::new( "res-timing", "new" )).unwrap();
		assert_eq!( registry.reregister_embedded(), vec![ RegisterError::ChecksumMismatch( "res-timing".to_string() )]);
		assert!( !registry.find( "res-timing" ).unwrap().is_embedded() );
	}

	#[test]
	fn register_outside_load_is_rejected() {
		let registry = Registry::default();
		registry.insert( ModuleManifest::new( "chan-sip", "c" )).unwrap();
		registry.set_runlevel( Runlevel::Normal );
		assert_eq!(
			registry.register( Registration::new( "chan-sip", "c", EntryPoints::new() )).unwrap_err(),
			RegisterError::NoLoadInProgress( "chan-sip".to_string() ),
		);
		assert_eq!(
			registry.register( Registration::new( "chan-iax", "c", EntryPoints::new() )).unwrap_err(),
			RegisterError::UnknownModule( "chan-iax".to_string() ),
		);
	}

}
