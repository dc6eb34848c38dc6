use std::{env, io::Read, process};

use flexalloc::{Heap, page_size};

/// Waits until the user presses ENTER when running with `--step`.
/// Useful when you want to inspect the mapping with tools like `pmap` or `gdb`
/// between steps.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let args: Vec<String> = env::args().skip(1).collect();
  let step = args.iter().any(|arg| arg == "--step");

  // Heap capacity in bytes, first positional argument.
  let capacity = match args.iter().find(|arg| !arg.starts_with("--")) {
    Some(arg) => match arg.parse::<isize>() {
      Ok(capacity) => capacity,
      Err(err) => {
        log::error!("invalid heap size {arg:?}: {err}");
        process::exit(1);
      }
    },
    None => 4096,
  };

  log::info!("page size = {} bytes, PID = {}", page_size(), process::id());

  // --------------------------------------------------------------------
  // 1) Initialize the heap. It is one big free block.
  // --------------------------------------------------------------------
  let mut heap = Heap::new();

  if let Err(err) = heap.init(capacity) {
    log::error!("cannot initialize heap: {err}");
    process::exit(1);
  }

  println!("\n[1] Heap initialized with {} usable bytes", heap.capacity());
  heap.print();

  // A second initialization is refused.
  if let Err(err) = heap.init(capacity) {
    println!("[1] Second init rejected: {err}");
  }

  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Allocate a few blocks of different sizes.
  // --------------------------------------------------------------------
  let sizes = [24, 60, 4, 36, 100];
  let mut pointers = Vec::new();

  for size in sizes {
    match heap.try_alloc(size) {
      Ok(ptr) => {
        println!("[2] alloc({size:>3}) = {ptr:?}");
        pointers.push(ptr);
      }
      Err(err) => println!("[2] alloc({size:>3}) failed: {err}"),
    }
  }

  heap.print();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Write into a block to show it's usable.
  // --------------------------------------------------------------------
  if let Some(ptr) = pointers.first() {
    let value = ptr.as_ptr().cast::<u64>();

    unsafe {
      value.write(0x1122334455667788);
      println!("\n[3] Value written = 0x{:X}", value.read());
    }
  }

  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Free the second and fourth blocks. They are not adjacent, so both
  //    stay separate free blocks.
  // --------------------------------------------------------------------
  for index in [1, 3] {
    if let Some(ptr) = pointers.get(index) {
      let result = heap.free(ptr.as_ptr());
      println!("\n[4] free({ptr:?}) = {result:?}");
    }
  }

  heap.print();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Best fit: a 32 byte request lands in the 40 byte hole rather than
  //    the 64 byte one.
  // --------------------------------------------------------------------
  if let Some(ptr) = heap.alloc(28) {
    println!("\n[5] alloc( 28) = {ptr:?}");
  }

  heap.print();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 6) Free the third block, right after the 64 byte hole. Both merge into
  //    one free block.
  // --------------------------------------------------------------------
  if let Some(ptr) = pointers.get(2) {
    let result = heap.free(ptr.as_ptr());
    println!("\n[6] free({ptr:?}) = {result:?}");

    // Freeing it again is an error and changes nothing.
    let result = heap.free(ptr.as_ptr());
    println!("[6] free({ptr:?}) again = {result:?}");
  }

  heap.print();

  match heap.check_invariants() {
    Ok(()) => println!("\n[7] Heap is consistent."),
    Err(err) => println!("\n[7] Heap is corrupted: {err}"),
  }

  println!("\n[8] End of example. The mapping is returned to the OS when the heap is dropped.");
}
