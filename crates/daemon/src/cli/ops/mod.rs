pub mod auth_url;
pub mod cat;
pub mod cp;
pub mod init;
pub mod login;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod put;
pub mod rename;
pub mod rm;
pub mod stat;
pub mod sync;

crate::command_enum! {
    (Init, init::Init),
    (AuthUrl, auth_url::AuthUrl),
    (Login, login::Login),
    (Ls, ls::Ls),
    (Stat, stat::Stat),
    (Cat, cat::Cat),
    (Put, put::Put),
    (Mkdir, mkdir::Mkdir),
    (Rm, rm::Rm),
    (Mv, mv::Mv),
    (Cp, cp::Cp),
    (Rename, rename::Rename),
    (Sync, sync::Sync),
}
