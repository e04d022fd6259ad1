//! The seam between the loader and the operating system's dynamic loader.
//!
//! A [`LibraryLoader`] opens the unit of a module and lets it register its
//! entry points with the [`Registry`]. [`DylibLoader`] does this for shared
//! objects built with [`declare_module!`]( crate::declare_module ).

use std::path::{ Path, PathBuf };
use thiserror::Error ;

use crate::Registry ;



/// Failures of the dynamic-load primitive.
#[derive( Error, Debug )]
pub enum LibraryError {
	#[error( "Failed to open '{path}': {source}" )]
	Open { path: PathBuf, #[source] source: libloading::Error },
	#[error( "Unit '{path}' exports no registration entry: {source}" )]
	MissingEntry { path: PathBuf, #[source] source: libloading::Error },
	#[error( "Failed to close unit: {0}" )]
	Close( #[source] libloading::Error ),
	#[error( "Unit unavailable: {0}" )]
	Unavailable( String ),
}

/// An open unit. Closing it is the last thing that happens to a load cycle.
pub trait UnitHandle: Send {
	fn close( self: Box<Self> ) -> Result<(), LibraryError>;
}

/// Everything a [`LibraryLoader`] needs to open one unit.
#[derive( Debug, Clone, Copy )]
pub struct OpenRequest<'a> {
	module: &'a str,
	path: &'a Path,
	export_globals: bool,
	registry: &'a Registry,
}

impl<'a> OpenRequest<'a> {

	pub(crate) fn new( module: &'a str, path: &'a Path, export_globals: bool, registry: &'a Registry ) -> Self {
		Self { module, path, export_globals, registry }
	}

	#[inline] pub fn module( &self ) -> &'a str { self.module }
	#[inline] pub fn path( &self ) -> &'a Path { self.path }
	/// Whether the unit's symbols should be visible to units opened later.
	#[inline] pub fn export_globals( &self ) -> bool { self.export_globals }
	/// The registry the unit must register with before `open` returns.
	#[inline] pub fn registry( &self ) -> &'a Registry { self.registry }

}

/// Opens units.
///
/// `open` must make the unit register itself, by calling
/// [`Registry::register`] with the request's registry, before returning.
/// A unit that opens but does not register fails to load.
pub trait LibraryLoader: Send + Sync {
	fn open( &self, request: &OpenRequest<'_> ) -> Result<Box<dyn UnitHandle>, LibraryError>;
}

/// Registration entry exported by units, see [`declare_module!`]( crate::declare_module ).
pub type RegisterFn = fn( &Registry );

/// Symbol name of the registration entry.
pub const REGISTER_SYMBOL: &[u8] = b"mod_link_register\0";

/// Loads units as shared objects through `libloading`.
///
/// Units must be built with the same compiler and the same version of this
/// crate as the host, since the registration entry passes Rust types.
#[derive( Debug, Clone, Copy, Default )]
pub struct DylibLoader ;

impl LibraryLoader for DylibLoader {
	fn open( &self, request: &OpenRequest<'_> ) -> Result<Box<dyn UnitHandle>, LibraryError> {

		let library = open_library( request.path(), request.export_globals() )?;

		{
			// SAFETY: `declare_module!` exports the symbol with exactly this signature.
			let register = unsafe { library.get::<RegisterFn>( REGISTER_SYMBOL ) }
				.map_err(| source | LibraryError::MissingEntry { path: request.path().to_path_buf(), source })?;
			register( request.registry() );
		}

		Ok( Box::new( DylibHandle( library )))

	}
}

#[cfg( unix )]
fn open_library( path: &Path, export_globals: bool ) -> Result<libloading::Library, LibraryError> {
	use libloading::os::unix::{ Library, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW };
	let flags = match export_globals {
		true => RTLD_NOW | RTLD_GLOBAL,
		false => RTLD_NOW | RTLD_LOCAL,
	};
	// SAFETY: running the unit's initialisers is what loading a module means.
	unsafe { Library::open( Some( path ), flags ) }
		.map( Into::into )
		.map_err(| source | LibraryError::Open { path: path.to_path_buf(), source })
}

#[cfg( not( unix ))]
fn open_library( path: &Path, _export_globals: bool ) -> Result<libloading::Library, LibraryError> {
	// SAFETY: running the unit's initialisers is what loading a module means.
	unsafe { libloading::Library::new( path ) }
		.map_err(| source | LibraryError::Open { path: path.to_path_buf(), source })
}

struct DylibHandle( libloading::Library );

impl UnitHandle for DylibHandle {
	fn close( self: Box<Self> ) -> Result<(), LibraryError> {
		self.0.close().map_err( LibraryError::Close )
	}
}

/// Exports the registration entry of a unit built as a shared object.
///
/// Takes a function returning the unit's [`Registration`]( crate::Registration ).
/// Rejections are logged by the registry and surface as a failed load.
///
/// ```ignore
/// use mod_link::{ declare_module, EntryPoints, Registration };
///
/// fn registration() -> Registration {
/// 	Registration::new( "chan-sip", env!( "CHAN_SIP_CHECKSUM" ), EntryPoints::new()
/// 		.with_start(|| Ok(()) )
/// 		.with_stop(|| {} ))
/// }
///
/// declare_module!( registration );
/// ```
#[macro_export]
macro_rules! declare_module {
	( $registration:path ) => {
		#[no_mangle]
		pub fn mod_link_register( registry: &$crate::Registry ) {
			let _ = registry.register( $registration() );
		}
	};
}
