/// This macro helps defining the two halves of a channel.
///
/// Every half is a plain struct with two groups of fields:
///
/// 1. `.handshake(...)`: the control wires of the half (e.g. `req`, `gnt`)
///    and their handshake ECC shadows.
/// 2. `.payload(...)`: the fields that must stay stable while a handshake is
///    pending. The macro generates [`payload_diff`] over exactly these
///    fields, which is what the stability monitors compare cycle to cycle.
///
/// **WARNING**: fields not listed in `.payload` are never checked for
/// stability, so every new payload wire must go there.
///
/// [`payload_diff`]: crate::channel::Request::payload_diff
#[macro_export]
macro_rules! define_bundle {
    ($(
        $(#[$att:meta])*
        $name:ident {
            .handshake( $($(#[$h_att:meta])* $hname:ident : $htype:ty),* $(,)? )
            .payload( $($(#[$p_att:meta])* $pname:ident : $ptype:ty),* $(,)? )
        }
    )*) => {
        $(
        $(#[$att])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
        pub struct $name {
            $($(#[$h_att])* pub $hname: $htype, )*
            $($(#[$p_att])* pub $pname: $ptype, )*
        }

        impl $name {
            /// Names of all payload fields, in declaration order.
            pub const PAYLOAD_FIELDS: &'static [&'static str] = &[$(stringify!($pname)),*];

            /// Names of the payload fields whose value differs from `other`.
            pub fn payload_diff(&self, other: &Self) -> Vec<&'static str> {
                #[allow(unused_mut)]
                let mut diff = Vec::new();
                $( if self.$pname != other.$pname { diff.push(stringify!($pname)); } )*
                diff
            }
        }
        )*
    };
}
