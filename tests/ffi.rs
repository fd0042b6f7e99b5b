//! C ABI argument handling. The worker is never started here, so these
//! calls only exercise enqueue, registration and the shared lock.

use gears::bridge::results::ResultSlot;
use gears::ffi;

#[test]
fn entry_points_validate_arguments_without_a_worker() {
    assert_eq!(ffi::workerHealth(), 0);

    let table: &'static mut [ResultSlot] =
        Box::leak(vec![ResultSlot::EMPTY; 4].into_boxed_slice());
    // SAFETY: the leaked table lives for the rest of the process.
    unsafe { ffi::registerResultArray(table.as_mut_ptr(), 4) };

    let pixels = [0u8; 16];
    // SAFETY: `pixels` is readable for its full length in every call.
    unsafe {
        assert_eq!(
            ffi::createTexture(0, 4, 2, 2, 1, pixels.as_ptr(), 16),
            -1
        );
        assert_eq!(
            ffi::createTexture(1, 4, -2, 2, 1, pixels.as_ptr(), 16),
            -1
        );
        assert_eq!(
            ffi::createTexture(2, 4, 2, 2, 1, std::ptr::null(), 16),
            -1
        );
        // A negative length is refused, not read as an empty buffer.
        assert_eq!(
            ffi::createTexture(5, 4, 2, 2, 1, pixels.as_ptr(), -1),
            -1
        );
        assert_eq!(
            ffi::createTexture(6, 4, 2, 2, 1, std::ptr::null(), -16),
            -1
        );

        ffi::lockMutex();
        ffi::lockMutex();
        assert_eq!(ffi::createTexture(3, 4, 2, 2, 1, pixels.as_ptr(), 16), 0);
        assert_eq!(ffi::createTexture(4, 4, 2, 2, 3, pixels.as_ptr(), 16), 0);
        ffi::unlockMutex();
        ffi::unlockMutex();
    }
    // Unmatched: logged and ignored.
    ffi::unlockMutex();
    ffi::deleteTexture(99);

    assert_eq!(ffi::workerHealth(), 0);
    assert!(table.iter().all(ResultSlot::is_empty));

    // SAFETY: null unregisters.
    unsafe { ffi::registerResultArray(std::ptr::null_mut(), 0) };
}
