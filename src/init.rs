//! Startup: seeding the registry, applying the directive set, and loading
//! what it asks for.

use std::collections::BTreeSet ;
use std::path::Path ;
use itertools::Itertools ;
use thiserror::Error ;
use tracing::{ error, info, warn };

use crate::{ ConfigError, GraphError, LoadError, Loader, ManifestSet, ModuleManifest, ModulesConfig, RegisterError, Runlevel, build_alldeps, strip_extension };



/// Failures that abort startup.
#[derive( Error, Debug )]
pub enum InitError {
	#[error( "The module loader has already been initialised" )] AlreadyInitialised,
	#[error( "Module '{0}' is marked both required and neverload" )] RequireNeverloadConflict( String ),
	#[error( "Invalid manifest: {0}" )] Manifest( #[from] RegisterError ),
	#[error( "Usage declared for unknown module '{0}'" )] UnknownUser( String ),
	#[error( "Failed to build module dependencies: {0}" )] Graph( #[from] GraphError ),
	#[error( "Required module '{module}' failed to load: {source}" )]
	RequiredFailed { module: String, #[source] source: LoadError },
	#[error( "{0}" )] Config( #[from] ConfigError ),
}

/// Problems startup logged and stepped over.
#[derive( Debug )]
pub enum InitWarning {
	/// A compiled-in unit did not match its manifest and is unusable.
	EmbeddedRejected( RegisterError ),
	/// A directive names a module nobody knows about.
	UnknownModule( String ),
	/// An optional module failed to load; startup went on without it.
	LoadFailed { module: String, source: LoadError },
}

impl std::fmt::Display for InitWarning {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		match self {
			Self::EmbeddedRejected( err ) => write!( f, "Embedded module rejected: {err}" ),
			Self::UnknownModule( name ) => write!( f, "Unknown module '{name}'" ),
			Self::LoadFailed { module, source } => write!( f, "Module '{module}' could not be loaded: {source}" ),
		}
	}
}

impl Loader {

	/// Brings the loader from [`Runlevel::Embedding`] to [`Runlevel::Normal`].
	///
	/// The manifests seed the registry, and registrations of compiled-in
	/// units are matched against them. The directive set then flags banned
	/// modules, adds `uses` declarations, and decides what to load. The
	/// dependency graph is built, the load list is loaded in ascending
	/// `load_priority` order, and reloads requested meanwhile are executed.
	///
	/// # Errors
	/// Any failure of a `require`d module, conflicting directives, bad
	/// manifests or an unusable dependency graph. The loader is left in
	/// [`Runlevel::Loading`] and should be shut down.
	pub fn init(
		&self,
		config: &ModulesConfig,
		manifests: impl IntoIterator<Item = ModuleManifest>,
	) -> Result<Vec<InitWarning>, InitError> {

		if self.registry().runlevel() != Runlevel::Embedding { return Err( InitError::AlreadyInitialised ) }
		let mut warnings = Vec::new();

		for manifest in manifests { self.registry().insert( manifest )?; }
		warnings.extend( self.registry().reregister_embedded().into_iter().map( InitWarning::EmbeddedRejected ));
		self.registry().set_runlevel( Runlevel::Loading );

		let neverload = names( &config.neverload );
		let require = names( &config.require );
		let noload = names( &config.noload );
		if let Some( conflict ) = require.intersection( &neverload ).next() {
			error!( module = %conflict, "Module is marked both required and neverload" );
			return Err( InitError::RequireNeverloadConflict( conflict.clone() ));
		}

		for name in &neverload {
			match self.find( name ) {
				Some( module ) => module.lock().neverload = true,
				None => warnings.push( InitWarning::UnknownModule( name.clone() )),
			}
		}

		for directive in &config.uses {
			let name = strip_extension( &directive.module );
			let module = self.find( name ).ok_or_else(|| InitError::UnknownUser( name.to_string() ))?;
			module.add_use( directive.capability() );
		}

		build_alldeps( self.registry() ).inspect_err(| err | error!( %err, "Failed to build module dependencies" ))?;

		let mut wanted = names( &config.load );
		if config.autoload {
			wanted.extend( self.registry().modules().iter().map(| module | module.name().to_string() ));
		}
		wanted.retain(| name | !noload.contains( name ));
		wanted.extend( require.iter().cloned() );
		wanted.retain(| name | !neverload.contains( name ));

		let ( known, unknown ): ( Vec<_>, Vec<_> ) = wanted.into_iter()
			.partition_map(| name | match self.find( &name ) {
				Some( module ) => itertools::Either::Left( module ),
				None => itertools::Either::Right( name ),
			});

		for name in unknown {
			match require.contains( &name ) {
				true => return Err( InitError::RequiredFailed { source: LoadError::NotFound( name.clone() ), module: name }),
				false => {
					warn!( module = %name, "Module listed for loading is not known" );
					warnings.push( InitWarning::UnknownModule( name ));
				},
			}
		}

		let load_order = known.into_iter().sorted_by_key(| module | module.load_priority() ).collect::<Vec<_>>();
		info!( count = load_order.len(), "Loading modules" );

		for module in load_order {
			if let Err( source ) = self.load( &module ) {
				let name = module.name().to_string();
				match require.contains( &name ) {
					true => {
						error!( module = %name, %source, "Required module failed to load" );
						return Err( InitError::RequiredFailed { module: name, source });
					},
					false => {
						warn!( module = %name, %source, "Optional module failed to load, continuing" );
						warnings.push( InitWarning::LoadFailed { module: name, source });
					},
				}
			}
		}

		info!( running = self.running().len(), "Module loader initialised" );
		self.process_pending_reloads();
		Ok( warnings )

	}

	/// [`Loader::init`] with the directive set and the manifests read from
	/// TOML documents.
	pub fn init_from_paths(
		&self,
		modules_config: impl AsRef<Path>,
		manifests: impl AsRef<Path>,
	) -> Result<Vec<InitWarning>, InitError> {
		let config = ModulesConfig::from_path( modules_config )?;
		let manifests = ManifestSet::from_path( manifests )?;
		self.init( &config, manifests )
	}

}

fn names( list: &[String] ) -> BTreeSet<String> {
	list.iter().map(| name | strip_extension( name ).to_string() ).collect()
}
