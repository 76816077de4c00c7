pub mod command;
pub mod device;
pub mod event;
pub mod media;
pub mod space;

pub use command::{Axis, LayoutMode, MoveTarget, Request, Response};
pub use device::{BluetoothDeviceInfo, DeviceCategory, HardwareAddress};
pub use event::{Event, EventKind, NotificationInfo, SubscribeRequest};
pub use media::{Artwork, MediaInfo, TrackKey};
pub use space::{Frame, Space, SpaceId, WindowIcon, WindowId, WindowInfo};
