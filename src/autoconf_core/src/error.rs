//! Result codes and the per-operation error types built on them.
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use autoconf_core::error::ResultCode;
            /// assert_eq!(ResultCode::OutOfRange.as_str(), "OutOfRange");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }

        impl fmt::Display for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that an autoconfiguration
    /// operation can produce.
    ///
    /// Discriminants follow μITRON 4.0 where an equivalent code exists.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// The operation or the requested mode is not supported by the
        /// underlying hardware.
        NotSupported = -9,
        /// A parameter is invalid in a way that is not covered by any other
        /// error codes.
        BadParam = -17,
        /// The given handle does not refer to a live object of the callee.
        BadId = -18,
        /// The current context disallows the operation, e.g., the caller is
        /// running in interrupt context.
        BadContext = -25,
        /// The resource is in use by someone else.
        Busy = -28,
        /// A fixed-capacity arena is exhausted.
        NoSpace = -33,
        /// An address window lies outside the managed range.
        OutOfRange = -34,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// The requested object does not exist.
        NotFound = -42,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl std::error::Error for $name {}

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod extent_alloc_error {}
    /// Error type for [`Extent::alloc_region`] and [`Extent::alloc`].
    ///
    /// [`Extent::alloc_region`]: crate::extent::Extent::alloc_region
    /// [`Extent::alloc`]: crate::extent::Extent::alloc
    pub enum ExtentAllocError {
        /// The size is zero, the alignment is not a power of two, or the
        /// range wraps around the address space.
        BadParam,
        /// The range is not contained by the extent.
        OutOfRange,
        /// The range overlaps an existing allocation, or no free range of
        /// the requested shape exists.
        Busy,
        /// The boot-time region descriptor arena is exhausted.
        NoSpace,
    }
}

define_error! {
    mod extent_free_error {}
    /// Error type for [`Extent::free`].
    ///
    /// [`Extent::free`]: crate::extent::Extent::free
    pub enum ExtentFreeError {
        /// The size is zero or the range wraps around the address space.
        BadParam,
        /// The range is not entirely allocated.
        BadId,
        /// Freeing the middle of a region needs a new descriptor, and the
        /// boot-time arena is exhausted.
        NoSpace,
    }
}

define_error! {
    mod map_error {}
    /// Error type for [`BusSpace::map`].
    ///
    /// [`BusSpace::map`]: crate::bus_space::BusSpace::map
    pub enum MapError: ExtentAllocError {
        /// The size is zero or the window wraps around the address space.
        BadParam,
        /// The window is not contained by the space's extent.
        OutOfRange,
        /// The window overlaps an existing mapping.
        Busy,
        /// The boot-time region descriptor arena is exhausted.
        NoSpace,
        /// The space cannot provide a mapping with the requested flags.
        NotSupported,
    }
}

define_error! {
    mod unmap_error {}
    /// Error type for [`BusSpace::unmap`].
    ///
    /// [`BusSpace::unmap`]: crate::bus_space::BusSpace::unmap
    pub enum UnmapError {
        /// The handle does not describe a live mapping of this space.
        BadId,
    }
}

define_error! {
    mod subregion_error {}
    /// Error type for [`BusSpace::subregion`].
    ///
    /// [`BusSpace::subregion`]: crate::bus_space::BusSpace::subregion
    pub enum SubregionError {
        /// The size is zero.
        BadParam,
        /// The subregion does not fit in the parent handle.
        OutOfRange,
    }
}

define_error! {
    mod establish_error {}
    /// Error type for [`InterruptController::establish`].
    ///
    /// [`InterruptController::establish`]: crate::intr::InterruptController::establish
    pub enum EstablishError {
        /// The interrupt line does not exist.
        BadParam,
        /// The priority level or trigger type is not supported by the
        /// controller.
        NotSupported,
        /// The line is already in use with an incompatible trigger type.
        Busy,
        /// The line cannot take any more handlers.
        NoSpace,
    }
}

define_error! {
    mod disestablish_error {}
    /// Error type for [`InterruptController::disestablish`].
    ///
    /// [`InterruptController::disestablish`]: crate::intr::InterruptController::disestablish
    pub enum DisestablishError {
        /// The handle was never issued by this controller, or it has already
        /// been disestablished.
        BadId,
    }
}

define_error! {
    mod probe_error {}
    /// Error type for the match/probe dispatcher.
    pub enum ProbeError {
        /// The dispatcher was entered from interrupt context.
        BadContext,
    }
}

define_error! {
    mod attach_error {}
    /// Error type returned by a driver's attach function.
    pub enum AttachError: ProbeError, MapError, SubregionError, EstablishError {
        /// The device needs a feature the bus or the platform lacks.
        NotSupported,
        /// The attach arguments are unusable.
        BadParam,
        /// Configuration was attempted from interrupt context.
        BadContext,
        /// A resource lies outside the bus's range.
        OutOfRange,
        /// A resource is in use by another device.
        Busy,
        /// A fixed-capacity arena is exhausted.
        NoSpace,
        /// The device or a singleton resource is already configured.
        BadObjectState,
        /// A required sibling or resource does not exist.
        NotFound,
    }
}
