//! Flat teardown of dependency chains.
//!
//! Dropping a stopped instance's dependency edges can stop the dependency,
//! whose own edges then stop the next one, and closing a lib releases the
//! proxies of the libs it uses in the same way. Left to nested `Drop`s the
//! call stack would grow with the length of the chain. Instead every link
//! released while a teardown is already running on this thread is queued
//! and dropped by the outermost one.

use std::any::Any ;
use std::cell::{ Cell, RefCell };



thread_local! {
	static RELEASED: RefCell<Vec<Box<dyn Any>>> = const { RefCell::new( Vec::new() ) };
	static DRAINING: Cell<bool> = const { Cell::new( false ) };
}

struct Draining ;

impl Drop for Draining {
	fn drop( &mut self ) { DRAINING.set( false ) }
}

/// Drops `links` once no other teardown on this thread is in progress.
pub(crate) fn release<T: 'static>( links: T ) {

	RELEASED.with_borrow_mut(| queue | queue.push( Box::new( links )));
	if DRAINING.replace( true ) { return }

	let _draining = Draining ;
	while let Some( links ) = RELEASED.with_borrow_mut( Vec::pop ) {
		drop( links );
	}

}

#[cfg( test )]
mod tests {

	use super::* ;
	use std::rc::Rc ;

	/// Releases its successor from its own `Drop`, as an instance does with
	/// its dependency edges.
	struct Link {
		depth: Rc<Cell<usize>>,
		max_depth: Rc<Cell<usize>>,
		next: Option<Box<Link>>,
	}

	impl Drop for Link {
		fn drop( &mut self ) {
			self.depth.set( self.depth.get() + 1 );
			self.max_depth.set( self.max_depth.get().max( self.depth.get() ));
			if let Some( next ) = self.next.take() { release( next ) }
			self.depth.set( self.depth.get() - 1 );
		}
	}

	#[test]
	fn chained_releases_do_not_nest() {

		let ( depth, max_depth ) = ( Rc::new( Cell::new( 0 )), Rc::new( Cell::new( 0 )));
		let chain = ( 0..1000 ).fold( None, | next, _ | Some( Box::new( Link {
			depth: Rc::clone( &depth ),
			max_depth: Rc::clone( &max_depth ),
			next,
		})));

		release( chain );

		assert_eq!( depth.get(), 0 );
		assert_eq!( max_depth.get(), 1 );
		assert!( !DRAINING.get() );
		assert!( RELEASED.with_borrow( Vec::is_empty ));

	}

}
