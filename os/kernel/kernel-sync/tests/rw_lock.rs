use kernel_sync::RwSpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn readers_share_the_lock() {
    let l = RwSpinLock::new(5u32);
    let r1 = l.read();
    let r2 = l.try_read().expect("second reader");
    assert_eq!(*r1 + *r2, 10);
    assert_eq!(l.reader_count(), 2);
    assert!(l.try_write().is_none());
    drop(r1);
    drop(r2);
    assert_eq!(l.reader_count(), 0);
    assert!(l.try_write().is_some());
}

#[test]
fn writer_excludes_readers_and_writers() {
    let l = RwSpinLock::new(Vec::<u8>::new());
    let mut w = l.write();
    w.push(1);
    assert!(l.try_read().is_none());
    assert!(l.try_write().is_none());
    drop(w);
    assert_eq!(l.with_read(Vec::len), 1);
}

#[test]
fn with_write_mutates() {
    let mut l = RwSpinLock::new(String::from("a"));
    l.with_write(|s| s.push('b'));
    l.get_mut().push('c');
    assert_eq!(l.with_read(Clone::clone), "abc");
}

#[test]
fn writers_never_overlap_readers() {
    let threads = 8;
    let iters = 2_000;

    let lock = Arc::new(RwSpinLock::new(0usize));
    let writers_inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let lock = Arc::clone(&lock);
            let writers_inside = Arc::clone(&writers_inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..iters {
                    if (t + i) % 4 == 0 {
                        lock.with_write(|v| {
                            let prev = writers_inside.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(prev, 0, "two writers inside");
                            *v += 1;
                            writers_inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    } else {
                        lock.with_read(|_| {
                            assert_eq!(writers_inside.load(Ordering::SeqCst), 0);
                        });
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    let expected = (0..threads)
        .map(|t| (0..iters).filter(|i| (t + i) % 4 == 0).count())
        .sum::<usize>();
    assert_eq!(lock.with_read(|v| *v), expected);
}
