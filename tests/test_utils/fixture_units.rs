#[macro_export]
macro_rules! assert_running {
	( $loader:expr, [ $($name:literal),* $(,)? ] ) => {
		assert_eq!( $loader.running(), Vec::<String>::from([ $($name.to_string()),* ]), "Unexpected running set" )
	};
}

#[allow( dead_code )]
mod fixture_units {

	use std::collections::HashMap ;
	use std::sync::{ Arc, Mutex, OnceLock, PoisonError };
	use once_cell::sync::Lazy ;
	use mod_link::{
		EntryPoints, InitError, InitWarning, LibraryError, LibraryLoader, Loader, LoaderConfig,
		Module, ModuleManifest, ModulesConfig, OpenRequest, Registration, UnitHandle,
	};

	static TRACING: Lazy<()> = Lazy::new(|| {
		let _ = tracing_subscriber::fmt()
			.with_test_writer()
			.with_max_level( tracing::Level::DEBUG )
			.try_init();
	});

	/// Ordered record of every call the fake units received, as `"event:module"`.
	#[derive( Debug, Clone, Default )]
	pub struct Journal( Arc<Mutex<Vec<String>>> );

	impl Journal {

		pub fn record( &self, event: &str, module: &str ) {
			self.0.lock().unwrap_or_else( PoisonError::into_inner ).push( format!( "{event}:{module}" ));
		}

		pub fn events( &self ) -> Vec<String> {
			self.0.lock().unwrap_or_else( PoisonError::into_inner ).clone()
		}

		pub fn count( &self, entry: &str ) -> usize {
			self.events().iter().filter(| event | *event == entry ).count()
		}

		pub fn position( &self, entry: &str ) -> usize {
			self.events().iter().position(| event | event == entry )
				.unwrap_or_else(|| panic!( "'{entry}' not in journal: {:?}", self.events() ))
		}

		/// Events of one kind, e.g. every `stop`, in the order they happened.
		pub fn of( &self, event: &str ) -> Vec<String> {
			let prefix = format!( "{event}:" );
			self.events().into_iter()
				.filter_map(| entry | entry.strip_prefix( &prefix ).map( str::to_string ))
				.collect()
		}

		pub fn clear( &self ) {
			self.0.lock().unwrap_or_else( PoisonError::into_inner ).clear();
		}

	}

	pub type Hook = Arc<dyn Fn() + Send + Sync>;

	/// How a fake unit behaves when opened and driven.
	#[derive( Clone, Default )]
	pub struct UnitSpec {
		pub fail_open: bool,
		pub skip_register: bool,
		pub fail_init: bool,
		pub fail_start: bool,
		/// `Some( true )` for a reload entry point that succeeds.
		pub reload: Option<bool>,
		pub on_start: Option<Hook>,
		pub on_stop: Option<Hook>,
		pub on_reload: Option<Hook>,
		pub on_close: Option<Hook>,
		/// Description presented at registration.
		pub description: Option<String>,
		/// Checksum presented at registration instead of the manifest's.
		pub checksum: Option<String>,
	}

	impl UnitSpec {
		pub fn new() -> Self { Self::default() }
		pub fn failing_open( mut self ) -> Self { self.fail_open = true ; self }
		pub fn not_registering( mut self ) -> Self { self.skip_register = true ; self }
		pub fn failing_init( mut self ) -> Self { self.fail_init = true ; self }
		pub fn failing_start( mut self ) -> Self { self.fail_start = true ; self }
		pub fn reloadable( mut self ) -> Self { self.reload = Some( true ); self }
		pub fn failing_reload( mut self ) -> Self { self.reload = Some( false ); self }
		pub fn on_start( mut self, hook: impl Fn() + Send + Sync + 'static ) -> Self { self.on_start = Some( Arc::new( hook )); self }
		pub fn on_stop( mut self, hook: impl Fn() + Send + Sync + 'static ) -> Self { self.on_stop = Some( Arc::new( hook )); self }
		pub fn on_reload( mut self, hook: impl Fn() + Send + Sync + 'static ) -> Self { self.on_reload = Some( Arc::new( hook )); self }
		pub fn on_close( mut self, hook: impl Fn() + Send + Sync + 'static ) -> Self { self.on_close = Some( Arc::new( hook )); self }
		pub fn with_description( mut self, description: &str ) -> Self { self.description = Some( description.to_string() ); self }
		pub fn with_checksum( mut self, checksum: &str ) -> Self { self.checksum = Some( checksum.to_string() ); self }
	}

	pub fn entry_points( name: &str, spec: &UnitSpec, journal: &Journal ) -> EntryPoints {

		let mut entry = EntryPoints::new();

		entry = {
			let ( name, journal, fail ) = ( name.to_string(), journal.clone(), spec.fail_init );
			entry.with_init( move || {
				journal.record( "init", &name );
				match fail {
					true => Err( "init refused".into() ),
					false => Ok(()),
				}
			})
		};

		entry = {
			let ( name, journal, fail, hook ) = ( name.to_string(), journal.clone(), spec.fail_start, spec.on_start.clone() );
			entry.with_start( move || {
				journal.record( "start", &name );
				if let Some( hook ) = &hook { hook() }
				match fail {
					true => Err( "start refused".into() ),
					false => Ok(()),
				}
			})
		};

		entry = {
			let ( name, journal, hook ) = ( name.to_string(), journal.clone(), spec.on_stop.clone() );
			entry.with_stop( move || {
				journal.record( "stop", &name );
				if let Some( hook ) = &hook { hook() }
			})
		};

		if let Some( succeeds ) = spec.reload {
			let ( name, journal, hook ) = ( name.to_string(), journal.clone(), spec.on_reload.clone() );
			entry = entry.with_reload( move || {
				journal.record( "reload", &name );
				if let Some( hook ) = &hook { hook() }
				match succeeds {
					true => Ok(()),
					false => Err( "reload refused".into() ),
				}
			});
		}

		entry

	}

	struct FakeUnit {
		name: String,
		journal: Journal,
		on_close: Option<Hook>,
	}

	impl UnitHandle for FakeUnit {
		fn close( self: Box<Self> ) -> Result<(), LibraryError> {
			self.journal.record( "close", &self.name );
			if let Some( hook ) = &self.on_close { hook() }
			Ok(())
		}
	}

	/// In-memory stand-in for the OS loader. Units register while being
	/// opened, as real ones do from their registration entry.
	pub struct FakeLoader {
		units: HashMap<String, UnitSpec>,
		journal: Journal,
	}

	impl LibraryLoader for FakeLoader {
		fn open( &self, request: &OpenRequest<'_> ) -> Result<Box<dyn UnitHandle>, LibraryError> {

			let name = request.module();
			self.journal.record( "open", name );
			let spec = self.units.get( name ).cloned().unwrap_or_default();
			if spec.fail_open { return Err( LibraryError::Unavailable( name.to_string() )) }

			if !spec.skip_register {
				let checksum = match &spec.checksum {
					Some( checksum ) => checksum.clone(),
					None => request.registry().find( name ).map( | module | module.checksum().to_string() ).unwrap_or_default(),
				};
				let registration = Registration::new( name, checksum, entry_points( name, &spec, &self.journal ));
				let _ = request.registry().register( match &spec.description {
					Some( description ) => registration.with_description( description.as_str() ),
					None => registration,
				});
			}

			Ok( Box::new( FakeUnit { name: name.to_string(), journal: self.journal.clone(), on_close: spec.on_close }))

		}
	}

	/// Builds a loader over fake units.
	pub struct Harness {
		manifests: Vec<ModuleManifest>,
		units: HashMap<String, UnitSpec>,
		journal: Journal,
		slot: Arc<OnceLock<Loader>>,
	}

	impl Harness {

		pub fn new() -> Self {
			Lazy::force( &TRACING );
			Self {
				manifests: Vec::new(),
				units: HashMap::new(),
				journal: Journal::default(),
				slot: Arc::new( OnceLock::new() ),
			}
		}

		pub fn module( mut self, manifest: ModuleManifest ) -> Self {
			self.manifests.push( manifest );
			self
		}

		pub fn unit( mut self, name: &str, spec: UnitSpec ) -> Self {
			self.units.insert( name.to_string(), spec );
			self
		}

		pub fn journal( &self ) -> Journal { self.journal.clone() }

		/// The loader being built, for hooks that call back into it.
		pub fn loader_slot( &self ) -> Arc<OnceLock<Loader>> { Arc::clone( &self.slot ) }

		pub fn build( self ) -> Fixture {
			let backend = FakeLoader { units: self.units, journal: self.journal.clone() };
			let loader = Loader::new( LoaderConfig::default(), backend ).expect( "Default config is valid" );
			let _ = self.slot.set( loader.clone() );
			Fixture { loader, journal: self.journal, manifests: self.manifests }
		}

		/// Builds and initialises with `load` as the only directive.
		pub fn start( self, load: &[&str] ) -> Fixture {
			let fixture = self.build();
			let warnings = fixture.init( &ModulesConfig {
				load: load.iter().map(| name | name.to_string() ).collect(),
				..ModulesConfig::default()
			}).expect( "Failed to initialise" );
			assert_no_warnings!( warnings );
			fixture
		}

	}

	pub struct Fixture {
		pub loader: Loader,
		pub journal: Journal,
		manifests: Vec<ModuleManifest>,
	}

	impl Fixture {

		pub fn init( &self, config: &ModulesConfig ) -> Result<Vec<InitWarning>, InitError> {
			self.loader.init( config, self.manifests.clone() )
		}

		pub fn module( &self, name: &str ) -> Arc<Module> {
			self.loader.find( name ).unwrap_or_else(|| panic!( "Module {name} is not known" ))
		}

	}

}
