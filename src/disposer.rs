//! The cascading-unload protocol.
//!
//! Every party that needs a module to keep running holds a [`Disposer`] on
//! its [`Instance`]. Unloading a module asks each of those parties, through
//! [`run_disposers`], to let go. A dependency edge answers by first asking
//! everyone who depends on the dependent, so an unload request travels
//! upwards through the dependency graph before anything stops.

use std::sync::{ Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak };
use tracing::debug ;

use crate::Instance ;



/// How hard an unload request pushes.
///
/// Levels are ordered; a party that lets go at some level also lets go at
/// every stronger one.
#[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash )]
pub enum ForceLevel {
	/// Only parties that do not care let go. Explicit administrative loads
	/// of other modules are kept.
	Soft,
	/// Administrative loads of dependents are released too.
	Firm,
	/// Everything that can be released is.
	Hard,
}

impl From<bool> for ForceLevel {
	fn from( force: bool ) -> Self {
		match force {
			true => Self::Hard,
			false => Self::Soft,
		}
	}
}

/// Answer of a disposer callback.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum Disposition {
	/// The party lets go; its disposer delists itself.
	Accepted,
	/// The party keeps the instance; nothing changes.
	Declined,
}

/// Callback asked to release an instance at some force level.
pub type DisposeCallback = Box<dyn Fn( ForceLevel ) -> Disposition + Send + Sync>;

pub(crate) enum DisposeAction {
	Release( DisposeCallback ),
	/// Dependency edge. Unset while the dependent is still starting.
	Dependent( OnceLock<Weak<Instance>> ),
}

#[derive( Debug, Default )]
struct DisposerFlags {
	donotcall: bool,
	inprogress: bool,
}

/// A party's hold on a running [`Instance`].
///
/// The disposer keeps its instance alive for as long as the disposer
/// itself lives, and sits in the instance's `users` list until it is
/// delisted, either by [`Disposer::destroy`] or by accepting a release
/// request. Delisting happens at most once.
pub struct Disposer {
	instance: Arc<Instance>,
	action: DisposeAction,
	flags: Mutex<DisposerFlags>,
}

impl std::fmt::Debug for Disposer {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		let kind = match &self.action {
			DisposeAction::Release( _ ) => "release",
			DisposeAction::Dependent( _ ) => "dependent",
		};
		f.debug_struct( "Disposer" )
			.field( "instance", &self.instance.module().name() )
			.field( "kind", &kind )
			.field( "flags", &*self.flags() )
			.finish()
	}
}

impl Disposer {

	/// Registers a new party on `instance`, released through `callback`.
	pub fn alloc(
		instance: &Arc<Instance>,
		callback: impl Fn( ForceLevel ) -> Disposition + Send + Sync + 'static,
	) -> Arc<Self> {
		Self::enlist( instance, DisposeAction::Release( Box::new( callback )))
	}

	pub(crate) fn alloc_edge( instance: &Arc<Instance> ) -> Arc<Self> {
		Self::enlist( instance, DisposeAction::Dependent( OnceLock::new() ))
	}

	fn enlist( instance: &Arc<Instance>, action: DisposeAction ) -> Arc<Self> {
		let disposer = Arc::new( Self {
			instance: Arc::clone( instance ),
			action,
			flags: Mutex::new( DisposerFlags::default() ),
		});
		instance.users_mut().push( Arc::clone( &disposer ));
		disposer
	}

	#[inline] pub fn instance( &self ) -> &Arc<Instance> { &self.instance }

	/// Whether the disposer is still in its instance's `users` list.
	pub fn is_listed( &self ) -> bool { !self.flags().donotcall }

	pub(crate) fn bind_dependent( &self, dependent: &Arc<Instance> ) {
		if let DisposeAction::Dependent( slot ) = &self.action {
			let _ = slot.set( Arc::downgrade( dependent ));
		}
	}

	/// Removes the disposer from its instance's `users` list. Calling it
	/// again, or after the disposer accepted a release, does nothing.
	pub fn destroy( &self ) {
		let removed = self.delist( &mut self.flags() );
		drop( removed );
	}

	fn flags( &self ) -> MutexGuard<'_, DisposerFlags> {
		self.flags.lock().unwrap_or_else( PoisonError::into_inner )
	}

	/// The removed entry is handed back so it is dropped after every lock
	/// guarding it has been released.
	fn delist( &self, flags: &mut DisposerFlags ) -> Option<Arc<Disposer>> {
		if flags.donotcall { return None }
		let removed = {
			let mut users = self.instance.users_mut();
			users.iter()
				.position(| user | std::ptr::eq( Arc::as_ptr( user ), self ))
				.map(| index | users.swap_remove( index ))
		};
		if removed.is_some() { flags.donotcall = true }
		removed
	}

	fn begin( &self ) -> bool {
		let mut flags = self.flags();
		if flags.donotcall || flags.inprogress { return false }
		flags.inprogress = true ;
		true
	}

	fn finish( &self, disposition: Disposition ) {
		let removed = {
			let mut flags = self.flags();
			flags.inprogress = false ;
			match disposition {
				Disposition::Accepted => self.delist( &mut flags ),
				Disposition::Declined => None,
			}
		};
		drop( removed );
	}

}

enum Step {
	Answered( Disposition ),
	Descend( Arc<Instance> ),
}

struct Frame {
	instance: Arc<Instance>,
	pending: std::vec::IntoIter<Arc<Disposer>>,
	/// The dependency edge waiting on this frame's verdict.
	edge: Option<Arc<Disposer>>,
}

impl Frame {
	fn new( instance: Arc<Instance>, edge: Option<Arc<Disposer>> ) -> Self {
		let pending = instance.users().clone().into_iter();
		Self { instance, pending, edge }
	}
}

/// Asks every user of `instance` to let go at `level`.
///
/// Each callback runs on a snapshot of the `users` list, outside any lock,
/// and never twice at the same time. Accepting delists the disposer, which
/// may release the last hold on an instance and stop it. A dependency edge
/// is settled by running the same request against the dependent first, and
/// accepts only when the dependent ends up without users.
///
/// The cascade runs on an explicit work stack, so its depth is not bounded
/// by the call stack. Running it again at the same level after everything
/// declined changes nothing.
pub fn run_disposers( instance: &Arc<Instance>, level: ForceLevel ) {

	debug!( module = %instance.module().name(), ?level, "Running disposers" );
	let mut stack = vec![ Frame::new( Arc::clone( instance ), None )];

	loop {

		let Some( frame ) = stack.last_mut() else { break };

		let Some( disposer ) = frame.pending.next() else {
			let Some( frame ) = stack.pop() else { break };
			if let Some( edge ) = frame.edge {
				let disposition = match frame.instance.users_len() {
					0 => Disposition::Accepted,
					_ => Disposition::Declined,
				};
				debug!(
					module = %frame.instance.module().name(),
					dependency = %edge.instance().module().name(),
					?disposition, "Dependency edge settled"
				);
				edge.finish( disposition );
			}
			continue ;
		};

		if !disposer.begin() { continue }

		let step = match &disposer.action {
			DisposeAction::Release( callback ) => Step::Answered( callback( level )),
			DisposeAction::Dependent( slot ) => match slot.get().map( Weak::upgrade ) {
				Some( Some( dependent )) => Step::Descend( dependent ),
				Some( None ) => Step::Answered( Disposition::Accepted ),
				None => Step::Answered( Disposition::Declined ),
			},
		};

		match step {
			Step::Answered( disposition ) => {
				debug!( module = %disposer.instance().module().name(), ?disposition, "Disposer answered" );
				disposer.finish( disposition );
			},
			Step::Descend( dependent ) => {
				debug!( module = %dependent.module().name(), ?level, "Running disposers" );
				stack.push( Frame::new( dependent, Some( disposer )));
			},
		}

	}

}
